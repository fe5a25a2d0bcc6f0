//! An event-driven network server framework.
//!
//! `hive-io` multiplexes many non-blocking sockets over a small group of
//! worker threads. Each worker owns one epoll instance and a deadline-ordered
//! timeout list, and drives its events through a three-valued dispatch
//! contract (change / finished / skip). On top of the reactor sits an
//! incremental HTTP/1.x engine with keep-alive connection reuse and a WebDAV
//! verb layer.
//!
//! # Example
//!
//! ```no_run
//! use std::net::TcpListener;
//! use std::sync::Arc;
//!
//! use hive_io::http::{FormResult, HttpHandler, HttpMethod, HttpVersion};
//! use hive_io::http::{HttpEventFactory, HttpScratchFactory};
//! use hive_io::http::answer::HttpAnswer;
//! use hive_io::reactor::{AcceptThread, Context, WorkerGroup};
//! use hive_io::buffer::NetBuffer;
//!
//! struct Hello;
//!
//! impl HttpHandler for Hello {
//!     fn parse_uri(&mut self, _method: HttpMethod, _version: HttpVersion,
//!         _host: &str, _file_name: &str, _query: &str) -> bool
//!     {
//!         true
//!     }
//!
//!     fn form_result(&mut self, buf: &mut NetBuffer, _ctx: &mut Context) -> FormResult {
//!         let mut answer = HttpAnswer::new(buf, "HTTP/1.1 200 OK\r\n", "text/plain", false);
//!         answer.add(b"hello");
//!         answer.set_content_length();
//!         FormResult::OkClose
//!     }
//! }
//!
//! let listener = TcpListener::bind("127.0.0.1:8080").unwrap();
//! let group = Arc::new(WorkerGroup::new(&HttpScratchFactory::default(), 4, 128).unwrap());
//! let factory = Arc::new(HttpEventFactory::new(|| Box::new(Hello) as Box<dyn HttpHandler>));
//! let accept = AcceptThread::spawn(group, listener, factory).unwrap();
//! accept.join();
//! ```

macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)? )) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub mod sys;

pub mod poller;

mod queue;
mod waker;

pub mod buffer;
pub mod clock;
pub mod http;
pub mod reactor;
pub mod task_pool;
pub mod webdav;

pub use waker::Waker;

pub use queue::Queue;

pub use poller::{EpollOpt, Event, Events, Poller, Ready, Source, Token};

pub use buffer::{BufferPool, IoResult, NetBuffer};

pub use reactor::{
    AcceptThread, Context, CtlOp, Dispatch, EventFactory, Registration, Resumer, ScratchFactory,
    TimerEvent, WorkEvent, Worker, WorkerGroup,
};

pub use task_pool::TaskPool;
