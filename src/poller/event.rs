use crate::sys::epoll::epoll_to_ready;

use super::{Ready, Token};

/// One entry of a ready batch: the registered token plus the readiness
/// flags the kernel reported for it.
#[derive(Copy, Clone, Debug)]
pub struct Event {
    kind: Ready,
    token: Token,
}

impl Event {
    pub fn new(kind: Ready, token: Token) -> Event {
        Event { kind, token }
    }

    pub fn readiness(&self) -> Ready {
        self.kind
    }

    pub fn token(&self) -> Token {
        self.token
    }
}

/// A reusable buffer for ready batches.
pub struct Events {
    inner: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            inner: Vec::with_capacity(capacity.max(1)),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<Event> {
        self.inner.get(idx).map(|event| {
            Event::new(
                epoll_to_ready(event.events),
                Token(event.u64 as usize),
            )
        })
    }

    pub(crate) fn sys_mut(&mut self) -> &mut Vec<libc::epoll_event> {
        &mut self.inner
    }
}
