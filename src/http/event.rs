use std::any::Any;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use log::{error, warn};

use crate::buffer::{BufferPool, IoResult, NetBuffer};
use crate::poller::Ready;
use crate::reactor::{Context, Dispatch, EventFactory, Registration, ScratchFactory, WorkEvent};

use super::{
    ExternalAnswer, FormResult, HttpHandler, HttpMethod, HttpVersion, PostState,
};

/// Engine configuration, one copy per worker scratch.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub max_request_size: usize,
    pub max_chunk_count: u32,
    pub buffer_size: usize,
    pub buffer_pool_cap: usize,
    pub operation_timeout: i64,
    pub first_request_timeout: i64,
    pub keep_alive_timeout: i64,
    pub max_post_in_memory: usize,
    pub tmp_path: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> HttpConfig {
        HttpConfig {
            max_request_size: 1024 * 1024,
            max_chunk_count: 128,
            buffer_size: 32 * 1024,
            buffer_pool_cap: 1024,
            operation_timeout: 60,
            first_request_timeout: 15,
            keep_alive_timeout: 60,
            max_post_in_memory: 64 * 1024,
            tmp_path: PathBuf::from("/tmp"),
        }
    }
}

/// Per-worker scratch for HTTP events: the tuning knobs plus the buffer
/// pool requests rent from.
pub struct HttpScratch {
    pub config: HttpConfig,
    pub pool: BufferPool,
}

impl HttpScratch {
    pub fn new(config: HttpConfig) -> HttpScratch {
        let pool = BufferPool::new(config.buffer_size, config.buffer_pool_cap);
        HttpScratch { config, pool }
    }
}

/// Builds an [`HttpScratch`] per worker.
#[derive(Default)]
pub struct HttpScratchFactory {
    config: HttpConfig,
}

impl HttpScratchFactory {
    pub fn new(config: HttpConfig) -> HttpScratchFactory {
        HttpScratchFactory { config }
    }
}

impl ScratchFactory for HttpScratchFactory {
    fn create(&self) -> Box<dyn Any + Send> {
        Box::new(HttpScratch::new(self.config.clone()))
    }
}

/// Builds an [`HttpEvent`] with a fresh handler for every accepted
/// connection.
pub struct HttpEventFactory<F> {
    make: F,
}

impl<F> HttpEventFactory<F>
where
    F: Fn() -> Box<dyn HttpHandler> + Send + Sync,
{
    pub fn new(make: F) -> HttpEventFactory<F> {
        HttpEventFactory { make }
    }
}

impl<F> EventFactory for HttpEventFactory<F>
where
    F: Fn() -> Box<dyn HttpHandler> + Send + Sync,
{
    fn create(&self, stream: TcpStream, _peer: SocketAddr) -> Box<dyn WorkEvent> {
        Box::new(HttpEvent::new(stream, (self.make)()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HttpState {
    WaitRequest,
    WaitAdditionalData,
    RequestReceived,
    Send,
    SendAndClose,
    WaitExternal,
    Finished,
}

const TERMINATOR: &[u8; 4] = b"\r\n\r\n";
const MIN_REQUEST: usize = "GET / HTTP/1.0\r\n\r\n".len();

const DEFAULT_FIRST_REQUEST_TIMEOUT: i64 = 15;
const DEFAULT_OPERATION_TIMEOUT: i64 = 60;
const DEFAULT_KEEP_ALIVE_TIMEOUT: i64 = 60;

/// One HTTP connection on a worker.
///
/// Owns the socket and, while a request is in flight, a buffer rented
/// from the worker pool. The terminator scanner keeps its position and
/// its phase within `\r\n\r\n` across partial reads, so a request chopped
/// at any byte boundary parses the same as one that arrived whole.
pub struct HttpEvent {
    stream: TcpStream,
    reg: Registration,
    handler: Box<dyn HttpHandler>,
    buf: Option<NetBuffer>,
    state: HttpState,
    header_start: usize,
    scanned: usize,
    term_phase: u8,
    chunks: u32,
    partial: bool,
    op_deadline: bool,
    deadline: i64,
}

impl HttpEvent {
    pub fn new(stream: TcpStream, handler: Box<dyn HttpHandler>) -> HttpEvent {
        let fd = stream.as_raw_fd();

        HttpEvent {
            stream,
            reg: Registration::new(fd, Ready::readable() | Ready::hup()),
            handler,
            buf: None,
            state: HttpState::WaitRequest,
            header_start: 0,
            scanned: 0,
            term_phase: 0,
            chunks: 0,
            partial: false,
            op_deadline: false,
            deadline: 0,
        }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    fn end_work(&mut self, ctx: &mut Context<'_>) {
        self.state = HttpState::Finished;
        if let Some(buf) = self.buf.take() {
            if let Some(scratch) = ctx.scratch_mut::<HttpScratch>() {
                scratch.pool.free(buf);
            }
        }
    }

    fn ensure_buffer(&mut self, ctx: &mut Context<'_>) -> bool {
        if self.buf.is_some() {
            return true;
        }
        match ctx.scratch_mut::<HttpScratch>() {
            Some(scratch) => {
                self.buf = Some(scratch.pool.get());
                true
            }
            None => {
                error!("worker scratch is not an HttpScratch");
                false
            }
        }
    }

    fn read_request(&mut self, ctx: &mut Context<'_>, changed: &mut bool) -> bool {
        let max_request_size;
        let max_chunk_count;
        let operation_timeout;
        {
            let scratch = match ctx.scratch_mut::<HttpScratch>() {
                Some(scratch) => scratch,
                None => {
                    error!("worker scratch is not an HttpScratch");
                    return false;
                }
            };
            max_request_size = scratch.config.max_request_size;
            max_chunk_count = scratch.config.max_chunk_count;
            operation_timeout = scratch.config.operation_timeout;
            if self.buf.is_none() {
                self.buf = Some(scratch.pool.get());
            }
        }

        let fd = self.reg.fd();
        {
            let buf = match self.buf.as_mut() {
                Some(buf) => buf,
                None => return false,
            };

            match buf.read(fd) {
                IoResult::Error | IoResult::ConnectionClose => return false,
                IoResult::InProgress => return true,
                IoResult::Ok => {}
            }

            self.chunks += 1;
            if self.chunks > max_chunk_count {
                error!("too many chunks ({}) received during a request", self.chunks);
                return false;
            }

            if buf.len() > max_request_size {
                error!(
                    "maximum request size {} exceeded ({})",
                    max_request_size,
                    buf.len()
                );
                return false;
            }
        }

        if !self.op_deadline {
            self.op_deadline = true;
            self.deadline = ctx.now() + operation_timeout;
            *changed = true;
        }

        if self.buf.as_ref().map(NetBuffer::len).unwrap_or(0) < MIN_REQUEST {
            return true;
        }

        self.scan_headers(ctx)
    }

    fn scan_headers(&mut self, ctx: &mut Context<'_>) -> bool {
        let mut found_end = false;
        {
            let buf = match self.buf.as_ref() {
                Some(buf) => buf,
                None => return false,
            };
            let data = buf.as_slice();
            let len = data.len();

            let mut pos = self.scanned;
            let mut phase = self.term_phase as usize;

            while pos < len {
                let b = data[pos];
                if b == TERMINATOR[phase] {
                    if b == b'\n' {
                        // a line ends here; pos - 1 is its '\r'
                        let line = &data[self.header_start..pos - 1];
                        if !line.is_empty() {
                            let ok = if self.header_start == 0 {
                                parse_request_line(&mut *self.handler, line)
                            } else {
                                parse_header_line(&mut *self.handler, line)
                            };
                            if !ok {
                                return false;
                            }
                        }
                        self.header_start = pos + 1;
                    }
                    phase += 1;
                    if phase == TERMINATOR.len() {
                        pos += 1;
                        found_end = true;
                        break;
                    }
                } else if phase != 0 {
                    phase = 0;
                }
                pos += 1;
            }

            self.scanned = pos;
            self.term_phase = phase as u8;
            if found_end {
                self.header_start = pos;
            }
        }

        if found_end {
            return self.parse_body(ctx);
        }

        true
    }

    fn parse_body(&mut self, ctx: &mut Context<'_>) -> bool {
        let body_start = self.header_start;
        let buf = match self.buf.as_mut() {
            Some(buf) => buf,
            None => return false,
        };

        match self.handler.parse_post(body_start, buf, ctx) {
            PostState::Received => {
                self.state = HttpState::RequestReceived;
                true
            }
            PostState::NeedMore => {
                self.state = HttpState::WaitAdditionalData;
                true
            }
            PostState::Error => false,
        }
    }

    fn read_post_data(&mut self, ctx: &mut Context<'_>) -> bool {
        let fd = self.reg.fd();
        let buf = match self.buf.as_mut() {
            Some(buf) => buf,
            None => return false,
        };

        match buf.read(fd) {
            IoResult::Error | IoResult::ConnectionClose => return false,
            IoResult::InProgress => return true,
            IoResult::Ok => {}
        }

        match self.handler.parse_post(self.header_start, buf, ctx) {
            PostState::Received => {
                self.state = HttpState::RequestReceived;
                true
            }
            PostState::NeedMore => true,
            PostState::Error => false,
        }
    }

    fn form_and_send(&mut self, ctx: &mut Context<'_>) -> Dispatch {
        let result = {
            let buf = match self.buf.as_mut() {
                Some(buf) => buf,
                None => return Dispatch::Finished,
            };
            buf.clear();
            self.handler.form_result(buf, ctx)
        };

        self.apply_form_result(result, ctx)
    }

    fn apply_form_result(&mut self, result: FormResult, ctx: &mut Context<'_>) -> Dispatch {
        match result {
            FormResult::OkClose => {
                self.partial = false;
                self.state = HttpState::SendAndClose;
                self.send_step(ctx)
            }
            FormResult::OkKeepAlive => {
                self.partial = false;
                self.state = HttpState::Send;
                self.send_step(ctx)
            }
            FormResult::OkPartialSend => {
                self.partial = true;
                self.state = HttpState::Send;
                self.send_step(ctx)
            }
            FormResult::OkWait => {
                self.state = HttpState::WaitExternal;
                let timeout = ctx
                    .scratch_mut::<HttpScratch>()
                    .map(|s| s.config.operation_timeout)
                    .unwrap_or(DEFAULT_OPERATION_TIMEOUT);
                self.deadline = ctx.now() + timeout;
                Dispatch::Change
            }
            FormResult::Error => self.send_error(ctx),
        }
    }

    fn send_step(&mut self, ctx: &mut Context<'_>) -> Dispatch {
        let fd = self.reg.fd();
        let result = {
            let buf = match self.buf.as_mut() {
                Some(buf) => buf,
                None => return Dispatch::Finished,
            };
            buf.send(fd)
        };

        match result {
            IoResult::InProgress => {
                if self.reg.wait_send(ctx.poller(), ctx.token()).is_ok() {
                    Dispatch::Skip
                } else {
                    self.end_work(ctx);
                    Dispatch::Finished
                }
            }
            IoResult::Ok => {
                if self.partial {
                    let result = {
                        let buf = match self.buf.as_mut() {
                            Some(buf) => buf,
                            None => return Dispatch::Finished,
                        };
                        buf.clear();
                        self.handler.get_more_data(buf, ctx)
                    };
                    return self.apply_form_result(result, ctx);
                }

                if self.state == HttpState::Send {
                    self.finish_keep_alive(ctx)
                } else {
                    self.end_work(ctx);
                    Dispatch::Finished
                }
            }
            _ => {
                self.end_work(ctx);
                Dispatch::Finished
            }
        }
    }

    fn finish_keep_alive(&mut self, ctx: &mut Context<'_>) -> Dispatch {
        if !self.handler.reset() {
            self.end_work(ctx);
            return Dispatch::Finished;
        }

        let keep_alive_timeout = match ctx.scratch_mut::<HttpScratch>() {
            Some(scratch) => {
                if let Some(buf) = self.buf.take() {
                    scratch.pool.free(buf);
                }
                scratch.config.keep_alive_timeout
            }
            None => DEFAULT_KEEP_ALIVE_TIMEOUT,
        };

        self.state = HttpState::WaitRequest;
        self.header_start = 0;
        self.scanned = 0;
        self.term_phase = 0;
        self.chunks = 0;
        self.partial = false;
        self.op_deadline = false;
        self.deadline = ctx.now() + keep_alive_timeout;

        if self.reg.wait_read(ctx.poller(), ctx.token()).is_err() {
            self.end_work(ctx);
            return Dispatch::Finished;
        }

        Dispatch::Change
    }

    fn send_error(&mut self, ctx: &mut Context<'_>) -> Dispatch {
        if !self.ensure_buffer(ctx) {
            self.state = HttpState::Finished;
            return Dispatch::Finished;
        }

        self.partial = false;

        let formed = {
            let buf = match self.buf.as_mut() {
                Some(buf) => buf,
                None => return Dispatch::Finished,
            };
            buf.clear();
            self.handler.form_error(buf)
        };

        match formed {
            Some(FormResult::OkKeepAlive) => self.state = HttpState::Send,
            Some(_) => self.state = HttpState::SendAndClose,
            None => {
                if let Some(buf) = self.buf.as_mut() {
                    buf.clear();
                    buf.append(b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n");
                }
                self.state = HttpState::SendAndClose;
            }
        }

        self.send_step(ctx)
    }
}

impl WorkEvent for HttpEvent {
    fn registration(&mut self) -> &mut Registration {
        &mut self.reg
    }

    fn deadline(&self) -> i64 {
        self.deadline
    }

    fn attached(&mut self, ctx: &mut Context<'_>) {
        let timeout = ctx
            .scratch_mut::<HttpScratch>()
            .map(|s| s.config.first_request_timeout)
            .unwrap_or(DEFAULT_FIRST_REQUEST_TIMEOUT);
        self.deadline = ctx.now() + timeout;
    }

    fn is_finished(&mut self) -> bool {
        self.state != HttpState::WaitExternal
    }

    fn call(&mut self, ready: Ready, ctx: &mut Context<'_>) -> Dispatch {
        if self.state == HttpState::Finished {
            return Dispatch::Finished;
        }

        if ready.is_readable() {
            let mut changed = false;

            if self.state == HttpState::WaitRequest && !self.read_request(ctx, &mut changed) {
                return self.send_error(ctx);
            }
            if self.state == HttpState::WaitAdditionalData && !self.read_post_data(ctx) {
                return self.send_error(ctx);
            }
            if self.state == HttpState::RequestReceived {
                return self.form_and_send(ctx);
            }

            return if changed { Dispatch::Change } else { Dispatch::Skip };
        }

        if ready.is_writable() {
            if self.state == HttpState::Send || self.state == HttpState::SendAndClose {
                return self.send_step(ctx);
            }
            warn!("writable readiness in state {:?}", self.state);
            self.end_work(ctx);
            return Dispatch::Finished;
        }

        if ready.is_hup() || ready.is_error() {
            self.end_work(ctx);
            return Dispatch::Finished;
        }

        Dispatch::Skip
    }

    fn resume(&mut self, payload: Box<dyn Any + Send>, ctx: &mut Context<'_>) -> Dispatch {
        if self.state != HttpState::WaitExternal {
            return Dispatch::Skip;
        }

        let answer = match payload.downcast::<ExternalAnswer>() {
            Ok(answer) => *answer,
            Err(_) => {
                warn!("resume payload is not an ExternalAnswer");
                return Dispatch::Skip;
            }
        };

        if !self.ensure_buffer(ctx) {
            self.state = HttpState::Finished;
            return Dispatch::Finished;
        }
        if let Some(buf) = self.buf.as_mut() {
            buf.clear();
            buf.append(&answer.data);
        }

        self.apply_form_result(answer.result, ctx)
    }
}

fn parse_request_line(handler: &mut dyn HttpHandler, line: &[u8]) -> bool {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line,
        Err(_) => return false,
    };

    let first_space = match line.find(' ') {
        Some(i) => i,
        None => return false,
    };
    let last_space = match line.rfind(' ') {
        Some(i) => i,
        None => return false,
    };
    if last_space <= first_space {
        return false;
    }

    let method = HttpMethod::parse(line[..first_space].as_bytes());

    let version_token = &line[last_space + 1..];
    if version_token.len() < 5 || !version_token[..5].eq_ignore_ascii_case("HTTP/") {
        return false;
    }
    let version = if version_token.eq_ignore_ascii_case("HTTP/1.1") {
        HttpVersion::V1_1
    } else {
        HttpVersion::V1_0
    };

    let url = line[first_space + 1..last_space].trim();
    if url.is_empty() {
        return false;
    }

    let (host, file_name, query) = split_url(url);

    handler.parse_uri(method, version, host, file_name, query)
}

/// Splits a request URL into an optional absolute-form host, the file
/// name, and the query. Ports after the host are skipped.
fn split_url(url: &str) -> (&str, &str, &str) {
    let mut rest = url;
    let mut host = "";

    let scheme_len = if rest.len() >= 7 && rest[..7].eq_ignore_ascii_case("http://") {
        7
    } else if rest.len() >= 8 && rest[..8].eq_ignore_ascii_case("https://") {
        8
    } else {
        0
    };

    if scheme_len > 0 {
        rest = &rest[scheme_len..];
        match rest.find(|c| c == '/' || c == ':') {
            Some(i) => {
                host = &rest[..i];
                if rest.as_bytes()[i] == b':' {
                    match rest[i..].find('/') {
                        Some(j) => rest = &rest[i + j..],
                        None => rest = "",
                    }
                } else {
                    rest = &rest[i..];
                }
            }
            None => {
                host = rest;
                rest = "";
            }
        }
    }

    match rest.find('?') {
        Some(i) => (host, &rest[..i], &rest[i + 1..]),
        None => (host, rest, ""),
    }
}

fn parse_header_line(handler: &mut dyn HttpHandler, line: &[u8]) -> bool {
    let colon = match line.iter().position(|&b| b == b':') {
        Some(i) => i,
        None => return false,
    };
    if colon == 0 {
        return false;
    }

    let name = &line[..colon];
    let mut value = &line[colon + 1..];
    while let Some((&first, rest)) = value.split_first() {
        if first == b' ' || first == b'\t' {
            value = rest;
        } else {
            break;
        }
    }

    if value.is_empty() {
        return true;
    }

    handler.parse_header(name, value)
}
