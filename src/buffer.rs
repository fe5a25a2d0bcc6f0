use std::io;
use std::os::unix::io::RawFd;

/// Outcome of one non-blocking transfer on a [`NetBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoResult {
    Ok,
    InProgress,
    ConnectionClose,
    Error,
}

/// A growable byte buffer specialised for partial send/recv.
///
/// `read` appends one non-blocking `recv` worth of bytes to the tail,
/// doubling the backing store once the free region shrinks below a quarter
/// of it. `send` pushes bytes out from an internal cursor so a short write
/// picks up where the previous one stopped.
#[derive(Debug, Default)]
pub struct NetBuffer {
    data: Vec<u8>,
    sent: usize,
}

impl NetBuffer {
    pub fn new() -> NetBuffer {
        NetBuffer {
            data: Vec::new(),
            sent: 0,
        }
    }

    pub fn with_capacity(reserved: usize) -> NetBuffer {
        NetBuffer {
            data: Vec::with_capacity(reserved),
            sent: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    pub fn sent(&self) -> usize {
        self.sent
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.sent = 0;
        self.data.clear();
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
        if self.sent > self.data.len() {
            self.sent = self.data.len();
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    pub fn shrink_to(&mut self, capacity: usize) {
        self.data.shrink_to(capacity);
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Overwrites `bytes.len()` bytes at `pos`; the region must already be
    /// composed.
    pub fn write_at(&mut self, pos: usize, bytes: &[u8]) {
        self.data[pos..pos + bytes.len()].copy_from_slice(bytes);
    }

    /// One non-blocking `recv` into the tail. Resets the send cursor.
    pub fn read(&mut self, fd: RawFd) -> IoResult {
        self.sent = 0;

        let reserved = self.data.capacity().max(MIN_RESERVE);
        let mut chunk = reserved - self.data.len().min(reserved);
        if !self.data.is_empty() && chunk < reserved / 4 {
            chunk = reserved; // double the buffer once 3/4 used
        }
        if chunk == 0 {
            chunk = reserved;
        }

        let old_len = self.data.len();
        self.data.resize(old_len + chunk, 0);

        let res = unsafe {
            libc::recv(
                fd,
                self.data[old_len..].as_mut_ptr() as *mut libc::c_void,
                chunk,
                libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT,
            )
        };

        if res > 0 {
            self.data.truncate(old_len + res as usize);
            return IoResult::Ok;
        }

        self.data.truncate(old_len);

        if res == 0 {
            return IoResult::ConnectionClose;
        }

        match io::Error::last_os_error().kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => IoResult::InProgress,
            _ => IoResult::Error,
        }
    }

    /// Non-blocking send from the cursor to the end, advancing the cursor.
    pub fn send(&mut self, fd: RawFd) -> IoResult {
        loop {
            let left = self.data.len() - self.sent;
            if left == 0 {
                return IoResult::Ok;
            }

            let res = unsafe {
                libc::send(
                    fd,
                    self.data[self.sent..].as_ptr() as *const libc::c_void,
                    left,
                    libc::MSG_NOSIGNAL,
                )
            };

            if res > 0 {
                self.sent += res as usize;
                continue;
            }

            if res == 0 {
                return IoResult::Error;
            }

            return match io::Error::last_os_error().kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => IoResult::InProgress,
                _ => IoResult::Error,
            };
        }
    }
}

const MIN_RESERVE: usize = 16;

/// A bounded LIFO free-list of idle buffers.
///
/// Amortises allocation across short-lived connections: `get` reuses an
/// idle buffer when one exists, `free` caches a cleared buffer unless the
/// list is full, shrinking over-grown ones back to the target size first.
#[derive(Debug)]
pub struct BufferPool {
    buffer_size: usize,
    limit: usize,
    free: Vec<NetBuffer>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, limit: usize) -> BufferPool {
        BufferPool {
            buffer_size,
            limit,
            free: Vec::new(),
        }
    }

    pub fn get(&mut self) -> NetBuffer {
        match self.free.pop() {
            Some(buf) => buf,
            None => NetBuffer::with_capacity(self.buffer_size),
        }
    }

    pub fn free(&mut self, mut buf: NetBuffer) {
        if self.free.len() < self.limit {
            buf.clear();
            if buf.capacity() > self.buffer_size {
                buf.shrink_to(self.buffer_size);
            }
            self.free.push(buf);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
