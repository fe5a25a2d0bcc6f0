use std::fmt;
use std::io::{self, Read};
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::time::Duration;

use crate::poller::{EpollOpt, Poller, Ready, Source, Token};

use super::fd::FileDesc;

#[derive(Clone, Copy)]
#[repr(i32)]
pub enum Clock {
    Realtime = libc::CLOCK_REALTIME,
    Monotonic = libc::CLOCK_MONOTONIC,
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Clock::Realtime => write!(f, "CLOCK_REALTIME"),
            Clock::Monotonic => write!(f, "CLOCK_MONOTONIC"),
        }
    }
}

#[derive(Debug)]
pub struct TimerFd {
    inner: FileDesc,
}

impl TimerFd {
    /// Creates a non-blocking monotonic timerfd.
    pub fn new() -> io::Result<TimerFd> {
        TimerFd::create(Clock::Monotonic)
    }

    pub fn create(clock: Clock) -> io::Result<TimerFd> {
        let fd = syscall!(timerfd_create(
            clock as i32,
            libc::TFD_CLOEXEC | libc::TFD_NONBLOCK
        ))?;

        Ok(TimerFd {
            inner: unsafe { FileDesc::new(fd) },
        })
    }

    /// Arms the timer: first expiration after `value`, then every `interval`.
    /// A zero `interval` makes the timer one-shot; a zero `value` disarms it,
    /// so one-shot timers due immediately should pass at least a nanosecond.
    pub fn settime(&self, value: Duration, interval: Duration) -> io::Result<()> {
        let new_value = libc::itimerspec {
            it_interval: duration_to_timespec(interval),
            it_value: duration_to_timespec(value),
        };

        let mut old_value: libc::itimerspec = unsafe { mem::zeroed() };

        syscall!(timerfd_settime(
            self.inner.as_raw_fd(),
            0,
            &new_value,
            &mut old_value
        ))?;

        Ok(())
    }

    /// Reads and discards the expiration count accumulated since the last
    /// read, returning it. Fails with `WouldBlock` when the timer has not
    /// fired yet.
    pub fn read(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        (&self.inner).read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }
}

fn duration_to_timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}

impl FromRawFd for TimerFd {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        TimerFd {
            inner: FileDesc::new(fd),
        }
    }
}

impl AsRawFd for TimerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Source for TimerFd {
    fn add(&self, poller: &Poller, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
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

#[cfg(test)]
mod test {
    use super::TimerFd;
    use std::time::Duration;

    #[test]
    fn oneshot_fires() {
        let timerfd = TimerFd::new().unwrap();
        timerfd
            .settime(Duration::from_millis(10), Duration::ZERO)
            .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(timerfd.read().unwrap(), 1);
    }

    #[test]
    fn read_before_expiry_would_block() {
        let timerfd = TimerFd::new().unwrap();
        timerfd
            .settime(Duration::from_secs(60), Duration::ZERO)
            .unwrap();

        let err = timerfd.read().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }
}
