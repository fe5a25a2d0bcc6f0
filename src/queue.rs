use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

pub use concurrent_queue::{ConcurrentQueue, PushError};

use crate::poller::{EpollOpt, Poller, Ready, Source, Token};
use crate::waker::Waker;

/// A lock-free queue wired to an eventfd so a sleeping poller learns about
/// pushes from other threads. Register it as a [`Source`] and drain it with
/// [`Queue::try_pop`] when its token shows up ready.
pub struct Queue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    queue: ConcurrentQueue<T>,
    waker: Waker,
}

impl<T: Send> Queue<T> {
    pub fn unbounded() -> io::Result<Queue<T>> {
        Ok(Queue {
            inner: Arc::new(QueueInner {
                queue: ConcurrentQueue::unbounded(),
                waker: Waker::new()?,
            }),
        })
    }

    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        self.inner.queue.push(value).map(|_| {
            let _ = self.inner.waker.wakeup();
        })
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.queue.pop().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Acknowledges the wake-up after the ready batch reported this queue.
    pub fn finish(&self) -> io::Result<()> {
        self.inner.waker.finish()
    }

    /// Wakes the registered poller without pushing anything.
    pub fn wake(&self) -> io::Result<()> {
        self.inner.waker.wakeup()
    }
}

impl<T: Send> Clone for Queue<T> {
    fn clone(&self) -> Queue<T> {
        Queue {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send> AsRawFd for Queue<T> {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.waker.as_raw_fd()
    }
}

impl<T: Send> Source for Queue<T> {
    fn add(&self, poller: &Poller, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        self.inner.waker.add(poller, token, interest, opts)?;

        if !self.inner.queue.is_empty() {
            self.inner.waker.wakeup()?;
        }

        Ok(())
    }

    fn modify(
        &self,
        poller: &Poller,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        self.inner.waker.modify(poller, token, interest, opts)
    }

    fn delete(&self, poller: &Poller) -> io::Result<()> {
        self.inner.waker.delete(poller)
    }
}

#[cfg(test)]
mod test {
    use super::Queue;

    #[test]
    fn push_pop() {
        let queue: Queue<u32> = Queue::unbounded().unwrap();
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), None);
    }
}
