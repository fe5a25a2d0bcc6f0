use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use crate::sys;

pub use event::{Event, Events};
pub use opt::EpollOpt;
pub use ready::Ready;
pub use source::Source;
pub use token::Token;

mod event;
mod opt;
mod ready;
mod source;
mod token;

/// A readiness poller over the kernel notification facility.
///
/// Descriptors are associated with an opaque [`Token`] under an interest
/// mask; [`Poller::wait`] returns the batch of ready entries. The poller
/// itself never owns descriptors and never dispatches — that is the
/// reactor's job.
pub struct Poller(pub(crate) sys::epoll::Epoll);

impl Poller {
    pub fn new() -> io::Result<Poller> {
        is_send::<Poller>();
        is_sync::<Poller>();

        Ok(Poller(sys::epoll::Epoll::new()?))
    }

    /// Waits up to `timeout` for readiness. Interruption by a signal shows
    /// up as an empty batch.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        self.0.wait(events.sys_mut(), timeout)?;
        Ok(events.len())
    }

    pub fn add<S>(&self, source: &S, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        validate_args(interest)?;

        source.add(self, token, interest, opts)?;

        Ok(())
    }

    pub fn modify<S>(
        &self,
        source: &S,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        validate_args(interest)?;

        source.modify(self, token, interest, opts)?;

        Ok(())
    }

    pub fn delete<S>(&self, source: &S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        source.delete(self)?;

        Ok(())
    }
}

impl AsRawFd for Poller {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Poller")
    }
}

fn validate_args(interest: Ready) -> io::Result<()> {
    if !interest.is_readable() && !interest.is_writable() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "interest must include readable or writable",
        ));
    }

    Ok(())
}

fn is_send<T: Send>() {}
fn is_sync<T: Sync>() {}
