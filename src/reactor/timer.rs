use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use crate::poller::Ready;
use crate::sys::timerfd::TimerFd;

use super::event::{Context, Dispatch, Registration, WorkEvent};

/// A one-shot or periodic timer as a [`WorkEvent`].
///
/// Firing reads-and-discards the kernel expiration count and invokes the
/// callback. One-shot timers retire themselves afterwards; tearing one
/// down early is the same as any other event tear-down.
pub struct TimerEvent {
    timer: TimerFd,
    reg: Registration,
    periodic: bool,
    callback: Box<dyn FnMut(&mut Context<'_>) + Send>,
}

impl TimerEvent {
    pub fn oneshot<F>(after: Duration, callback: F) -> io::Result<TimerEvent>
    where
        F: FnMut(&mut Context<'_>) + Send + 'static,
    {
        // a zero it_value disarms a timerfd
        let after = after.max(Duration::from_nanos(1));
        TimerEvent::create(after, None, Box::new(callback))
    }

    pub fn periodic<F>(first: Duration, every: Duration, callback: F) -> io::Result<TimerEvent>
    where
        F: FnMut(&mut Context<'_>) + Send + 'static,
    {
        let first = first.max(Duration::from_nanos(1));
        TimerEvent::create(first, Some(every), Box::new(callback))
    }

    fn create(
        value: Duration,
        interval: Option<Duration>,
        callback: Box<dyn FnMut(&mut Context<'_>) + Send>,
    ) -> io::Result<TimerEvent> {
        let timer = TimerFd::new()?;
        timer.settime(value, interval.unwrap_or(Duration::ZERO))?;

        let reg = Registration::new(timer.as_raw_fd(), Ready::readable());

        Ok(TimerEvent {
            timer,
            reg,
            periodic: interval.is_some(),
            callback,
        })
    }
}

impl WorkEvent for TimerEvent {
    fn registration(&mut self) -> &mut Registration {
        &mut self.reg
    }

    fn call(&mut self, ready: Ready, ctx: &mut Context<'_>) -> Dispatch {
        if ready.is_error() || ready.is_hup() {
            return Dispatch::Finished;
        }

        let _ = self.timer.read();
        (self.callback)(ctx);

        if self.periodic {
            Dispatch::Skip
        } else {
            Dispatch::Finished
        }
    }

    fn deadline(&self) -> i64 {
        // timers expire through their descriptor, not the sweep
        i64::MAX
    }
}
