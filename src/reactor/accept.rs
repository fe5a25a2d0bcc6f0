use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, warn};

use crate::sys::socket;

use super::event::WorkEvent;
use super::group::WorkerGroup;

/// Builds one [`WorkEvent`] per accepted connection.
pub trait EventFactory: Send + Sync {
    fn create(&self, stream: TcpStream, peer: SocketAddr) -> Box<dyn WorkEvent>;
}

const ACCEPT_DEFER_TIMEOUT: libc::c_int = 10;

/// The accept loop: blocks on the listening socket, makes every child
/// non-blocking, and hands the factory-built event to the worker group.
pub struct AcceptThread {
    handle: JoinHandle<()>,
}

impl AcceptThread {
    pub fn spawn(
        group: Arc<WorkerGroup>,
        listener: TcpListener,
        factory: Arc<dyn EventFactory>,
    ) -> io::Result<AcceptThread> {
        if let Err(err) = socket::set_defer_accept(listener.as_raw_fd(), ACCEPT_DEFER_TIMEOUT) {
            warn!("cannot set defer-accept on the listener: {}", err);
        }

        let handle = thread::Builder::new()
            .name("hive-accept".into())
            .spawn(move || run(group, listener, factory))?;

        Ok(AcceptThread { handle })
    }

    /// Blocks until the accept loop exits, which it never does on its own;
    /// useful as the main-thread park of a server binary.
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

fn run(group: Arc<WorkerGroup>, listener: TcpListener, factory: Arc<dyn EventFactory>) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(err) => {
                error!("connection accept error: {}", err);
                continue;
            }
        };

        if let Err(err) = stream.set_nonblocking(true) {
            error!("cannot make the accepted socket non-blocking: {}", err);
            continue;
        }

        let event = factory.create(stream, peer);
        if group.add_connection(event).is_err() {
            // dropping the refused event closed its descriptor
            error!("cannot add connection from {}", peer);
        }
    }
}
