//! The reactor: workers, their timeout lists, connection placement and the
//! accept loop.

pub use accept::{AcceptThread, EventFactory};
pub use event::{Context, CtlOp, Dispatch, Registration, Resumer, WorkEvent};
pub use group::WorkerGroup;
pub use timer::TimerEvent;
pub use worker::{ScratchFactory, Worker};

mod accept;
mod event;
mod group;
mod timer;
mod worker;
