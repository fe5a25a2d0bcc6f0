use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::error;

use crate::clock;
use crate::poller::Ready;
use crate::sys::timerfd::TimerFd;

use super::event::{Context, Dispatch, Registration, WorkEvent};
use super::worker::{ScratchFactory, Worker};

/// A fixed set of workers plus the shared 1 Hz time refresher and a simple
/// load-spreading policy for new connections.
pub struct WorkerGroup {
    workers: Vec<Worker>,
    next: AtomicUsize,
}

impl WorkerGroup {
    /// Starts `workers` worker threads, each with its own scratch from
    /// `factory`, and seeds the update-time event on the first of them.
    pub fn new(
        factory: &dyn ScratchFactory,
        workers: usize,
        queue_len: usize,
    ) -> io::Result<WorkerGroup> {
        if workers == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "a worker group needs at least one worker",
            ));
        }

        clock::update();

        let mut started = Vec::with_capacity(workers);
        for _ in 0..workers {
            started.push(Worker::spawn(queue_len, factory.create())?);
        }

        let group = WorkerGroup {
            workers: started,
            next: AtomicUsize::new(0),
        };

        let update_time = UpdateTimeEvent::new()?;
        if group.workers[0].add(Box::new(update_time)).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "cannot register the update-time event",
            ));
        }

        Ok(group)
    }

    /// Places `event` on a worker chosen by a rotating counter, falling
    /// back to the others in order when one refuses. On total failure the
    /// event comes back so the caller can release its descriptor.
    pub fn add_connection(
        &self,
        mut event: Box<dyn WorkEvent>,
    ) -> Result<(), Box<dyn WorkEvent>> {
        let count = self.workers.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % count;

        for i in 0..count {
            match self.workers[(start + i) % count].add(event) {
                Ok(()) => return Ok(()),
                Err(refused) => event = refused,
            }
        }

        error!("no worker accepted the connection");
        Err(event)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker(&self, idx: usize) -> &Worker {
        &self.workers[idx]
    }

    pub fn stop(&self) {
        for worker in &self.workers {
            worker.stop();
        }
    }

    pub fn join(&mut self) {
        for worker in &mut self.workers {
            worker.join();
        }
    }
}

/// Fires once per second and refreshes the process-wide time; lives on one
/// worker for the lifetime of the group.
struct UpdateTimeEvent {
    timer: TimerFd,
    reg: Registration,
}

impl UpdateTimeEvent {
    fn new() -> io::Result<UpdateTimeEvent> {
        use std::os::unix::io::AsRawFd;

        let timer = TimerFd::new()?;
        timer.settime(Duration::from_secs(1), Duration::from_secs(1))?;

        let reg = Registration::new(timer.as_raw_fd(), Ready::readable());

        Ok(UpdateTimeEvent { timer, reg })
    }
}

impl WorkEvent for UpdateTimeEvent {
    fn registration(&mut self) -> &mut Registration {
        &mut self.reg
    }

    fn call(&mut self, _ready: Ready, _ctx: &mut Context<'_>) -> Dispatch {
        let _ = self.timer.read();
        clock::update();
        Dispatch::Skip
    }

    fn deadline(&self) -> i64 {
        i64::MAX
    }
}
