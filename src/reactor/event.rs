use std::any::Any;
use std::io;
use std::os::unix::io::RawFd;

use crate::clock;
use crate::poller::{EpollOpt, Poller, Ready, Token};
use crate::queue::Queue;

/// What a dispatched event tells its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The deadline moved; re-position the event in the timeout list.
    Change,
    /// The event is done; unlink and destroy it.
    Finished,
    /// Nothing to record.
    Skip,
}

/// The pending poller operation an event carries for its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlOp {
    Add,
    Mod,
    Del,
}

/// The descriptor-side state of an event: the fd, the interest mask and
/// the pending operation. `apply` performs the operation and flips it to
/// `Mod`, so the first application registers and every later one modifies.
#[derive(Debug)]
pub struct Registration {
    fd: RawFd,
    interest: Ready,
    opts: EpollOpt,
    op: CtlOp,
}

impl Registration {
    pub fn new(fd: RawFd, interest: Ready) -> Registration {
        Registration {
            fd,
            interest,
            opts: EpollOpt::level(),
            op: CtlOp::Add,
        }
    }

    pub fn with_opts(fd: RawFd, interest: Ready, opts: EpollOpt) -> Registration {
        Registration {
            fd,
            interest,
            opts,
            op: CtlOp::Add,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest(&self) -> Ready {
        self.interest
    }

    pub fn set_interest(&mut self, interest: Ready) {
        self.interest = interest;
    }

    pub fn op(&self) -> CtlOp {
        self.op
    }

    pub fn set_op(&mut self, op: CtlOp) {
        self.op = op;
    }

    /// Performs the pending operation under `token`, then flips the
    /// pending operation to `Mod`.
    pub fn apply(&mut self, poller: &Poller, token: Token) -> io::Result<()> {
        match self.op {
            CtlOp::Add => poller.add(&self.fd, token, self.interest, self.opts)?,
            CtlOp::Mod => poller.modify(&self.fd, token, self.interest, self.opts)?,
            CtlOp::Del => poller.delete(&self.fd)?,
        }

        self.op = CtlOp::Mod;

        Ok(())
    }

    /// Switches interest to readability and applies.
    pub fn wait_read(&mut self, poller: &Poller, token: Token) -> io::Result<()> {
        self.interest = Ready::readable() | Ready::hup();
        self.apply(poller, token)
    }

    /// Switches interest to writability and applies.
    pub fn wait_send(&mut self, poller: &Poller, token: Token) -> io::Result<()> {
        self.interest = Ready::writable();
        self.apply(poller, token)
    }
}

/// A deadline-carrying event owned by a worker.
///
/// The worker resolves ready tokens to these through its slab; the slab
/// key doubles as the event's position handle, so there is no back-pointer
/// from the event to its thread — everything the event needs from its
/// worker arrives through [`Context`].
pub trait WorkEvent: Send {
    fn registration(&mut self) -> &mut Registration;

    /// One dispatch step for the readiness `ready`.
    fn call(&mut self, ready: Ready, ctx: &mut Context<'_>) -> Dispatch;

    /// Unix-seconds deadline for the timeout sweep; `i64::MAX` never
    /// expires.
    fn deadline(&self) -> i64;

    /// Runs once under the worker mutex right after the registration
    /// succeeded.
    fn attached(&mut self, _ctx: &mut Context<'_>) {}

    /// Asked by the timeout sweep before an expired event is destroyed.
    /// Answering `false` buys one grace tick.
    fn is_finished(&mut self) -> bool {
        true
    }

    /// Completion of a previously announced external wait.
    fn resume(&mut self, _payload: Box<dyn Any + Send>, _ctx: &mut Context<'_>) -> Dispatch {
        Dispatch::Skip
    }
}

pub(crate) struct ResumeMsg {
    pub(crate) token: Token,
    pub(crate) payload: Box<dyn Any + Send>,
}

/// What an event sees of its worker while being dispatched: the poller for
/// re-registrations, its own token, the worker scratch, and the resume
/// plumbing.
pub struct Context<'a> {
    pub(crate) poller: &'a Poller,
    pub(crate) token: Token,
    pub(crate) scratch: &'a mut (dyn Any + Send),
    pub(crate) resumes: &'a Queue<ResumeMsg>,
    pub(crate) added: &'a mut Vec<Box<dyn WorkEvent>>,
}

impl<'a> Context<'a> {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn poller(&self) -> &Poller {
        self.poller
    }

    /// Current unix time from the shared 1 Hz clock.
    pub fn now(&self) -> i64 {
        clock::now()
    }

    /// The worker scratch downcast to the embedder's type.
    pub fn scratch_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.scratch.downcast_mut::<T>()
    }

    /// A handle that can later resume this event from any thread.
    pub fn resumer(&self) -> Resumer {
        Resumer {
            token: self.token,
            queue: self.resumes.clone(),
        }
    }

    /// Hands another event to the same worker; it is registered and
    /// inserted once the current dispatch batch completes.
    pub fn add_event(&mut self, event: Box<dyn WorkEvent>) {
        self.added.push(event);
    }
}

/// Resumes one suspended event on its owning worker. The payload lands in
/// [`WorkEvent::resume`] under the worker mutex.
#[derive(Clone)]
pub struct Resumer {
    token: Token,
    queue: Queue<ResumeMsg>,
}

impl Resumer {
    pub fn send(&self, payload: Box<dyn Any + Send>) {
        let _ = self.queue.push(ResumeMsg {
            token: self.token,
            payload,
        });
    }

    pub fn token(&self) -> Token {
        self.token
    }
}
