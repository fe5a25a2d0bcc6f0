use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use crate::poller::{EpollOpt, Poller, Ready, Source, Token};
use crate::sys::eventfd::EventFd;

/// Wakes a poller that is blocked in `wait` from another thread.
#[derive(Debug, Clone)]
pub struct Waker {
    inner: Arc<EventFd>,
}

impl Waker {
    pub fn new() -> io::Result<Waker> {
        Ok(Waker {
            inner: Arc::new(EventFd::new()?),
        })
    }

    pub fn wakeup(&self) -> io::Result<()> {
        match self.inner.write(1) {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.kind() == io::ErrorKind::WouldBlock {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Drains the pending wake-ups once the poller has observed them.
    pub fn finish(&self) -> io::Result<()> {
        match self.inner.read() {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.kind() == io::ErrorKind::WouldBlock {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Source for Waker {
    fn add(&self, poller: &Poller, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        self.inner.add(poller, token, interest, opts)
    }

    fn modify(
        &self,
        poller: &Poller,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        self.inner.modify(poller, token, interest, opts)
    }

    fn delete(&self, poller: &Poller) -> io::Result<()> {
        self.inner.delete(poller)
    }
}
