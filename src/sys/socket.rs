use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use libc::{c_int, c_void};

pub fn setsockopt<T>(fd: RawFd, level: c_int, name: c_int, payload: T) -> io::Result<()> {
    let payload = &payload as *const T as *const c_void;

    syscall!(setsockopt(
        fd,
        level,
        name,
        payload,
        mem::size_of::<T>() as libc::socklen_t
    ))?;

    Ok(())
}

/// Asks the kernel to complete the TCP handshake and wait up to
/// `timeout_secs` for the first data before waking the accepting thread.
pub fn set_defer_accept(fd: RawFd, timeout_secs: c_int) -> io::Result<()> {
    setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_DEFER_ACCEPT, timeout_secs)
}

pub fn set_nodelay(fd: RawFd, nodelay: bool) -> io::Result<()> {
    setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, nodelay as c_int)
}

#[cfg(test)]
mod test {
    use super::set_defer_accept;
    use std::net::TcpListener;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn defer_accept_on_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        set_defer_accept(listener.as_raw_fd(), 10).unwrap();
    }
}
