use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use super::{EpollOpt, Poller, Ready, Token};

/// Something a [`Poller`] can watch. Implemented for raw descriptors and
/// the socket types the framework hands around.
pub trait Source {
    fn add(&self, poller: &Poller, token: Token, interest: Ready, opts: EpollOpt)
        -> io::Result<()>;

    fn modify(
        &self,
        poller: &Poller,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()>;

    fn delete(&self, poller: &Poller) -> io::Result<()>;
}

impl Source for RawFd {
    fn add(
        &self,
        poller: &Poller,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        poller.0.add(*self, token, interest, opts)
    }

    fn modify(
        &self,
        poller: &Poller,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        poller.0.modify(*self, token, interest, opts)
    }

    fn delete(&self, poller: &Poller) -> io::Result<()> {
        poller.0.delete(*self)
    }
}

impl Source for TcpStream {
    fn add(
        &self,
        poller: &Poller,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        poller.add(&self.as_raw_fd(), token, interest, opts)
    }

    fn modify(
        &self,
        poller: &Poller,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        poller.modify(&self.as_raw_fd(), token, interest, opts)
    }

    fn delete(&self, poller: &Poller) -> io::Result<()> {
        poller.delete(&self.as_raw_fd())
    }
}

impl Source for TcpListener {
    fn add(
        &self,
        poller: &Poller,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        poller.add(&self.as_raw_fd(), token, interest, opts)
    }

    fn modify(
        &self,
        poller: &Poller,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        poller.modify(&self.as_raw_fd(), token, interest, opts)
    }

    fn delete(&self, poller: &Poller) -> io::Result<()> {
        poller.delete(&self.as_raw_fd())
    }
}
