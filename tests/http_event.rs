//! End-to-end scenarios for the HTTP engine, driven over real sockets.

mod common;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hive_io::buffer::NetBuffer;
use hive_io::http::{
    self, FormResult, HttpConfig, HttpEventFactory, HttpHandler, HttpMethod, HttpVersion,
    PostState,
};
use hive_io::reactor::{Context, TimerEvent};

use common::TestServer;

const ST_CREATE: u32 = 0x1;
const ST_DESTROY: u32 = 0x2;
const ST_COOKIE: u32 = 0x4;
const ST_URI: u32 = 0x8;
const ST_KEEP_ALIVE: u32 = 0x10;
const ST_POST: u32 = 0x20;
const ST_CONTENT_LENGTH: u32 = 0x40;
const ST_FORM_CALLED: u32 = 0x80;
const ST_MORE_DATA_CALLED: u32 = 0x100;
const ST_TIMER_FIRED: u32 = 0x200;

const SIMPLE_ANSWER: &[u8] = b"HTTP/1.0 200 OK\r\n\r\n";

fn set(flags: &Arc<AtomicU32>, bit: u32) {
    flags.fetch_or(bit, Ordering::Relaxed);
}

fn has(flags: &Arc<AtomicU32>, bit: u32) -> bool {
    flags.load(Ordering::Relaxed) & bit == bit
}

struct SimpleHandler {
    flags: Arc<AtomicU32>,
}

impl SimpleHandler {
    fn new(flags: &Arc<AtomicU32>) -> SimpleHandler {
        set(flags, ST_CREATE);
        SimpleHandler {
            flags: flags.clone(),
        }
    }
}

impl Drop for SimpleHandler {
    fn drop(&mut self) {
        set(&self.flags, ST_DESTROY);
    }
}

impl HttpHandler for SimpleHandler {
    fn parse_uri(
        &mut self,
        _method: HttpMethod,
        _version: HttpVersion,
        _host: &str,
        _file_name: &str,
        _query: &str,
    ) -> bool {
        true
    }

    fn form_result(&mut self, buf: &mut NetBuffer, _ctx: &mut Context<'_>) -> FormResult {
        buf.append(SIMPLE_ANSWER);
        FormResult::OkClose
    }
}

#[test]
fn create_destruction() {
    let flags = Arc::new(AtomicU32::new(0));
    let factory_flags = flags.clone();
    let server = TestServer::start(HttpEventFactory::new(move || {
        Box::new(SimpleHandler::new(&factory_flags)) as Box<dyn HttpHandler>
    }));

    let answer = server.request(b"GET / HTTP/1.0\r\n\r\n");
    assert_eq!(answer, SIMPLE_ANSWER);

    assert!(common::eventually(|| has(&flags, ST_CREATE | ST_DESTROY)));
}

struct FunctionalityHandler {
    flags: Arc<AtomicU32>,
}

impl HttpHandler for FunctionalityHandler {
    fn parse_uri(
        &mut self,
        _method: HttpMethod,
        _version: HttpVersion,
        _host: &str,
        file_name: &str,
        query: &str,
    ) -> bool {
        if file_name != "/test" {
            return false;
        }

        let mut a = 0;
        let mut b = String::new();
        let mut query = query;
        while let Some((param, value)) = http::next_param(&mut query) {
            match param {
                'a' => a = value.parse().unwrap_or(0),
                'b' => b = value.to_string(),
                _ => {}
            }
        }
        if a == 1 && b == "test1" {
            set(&self.flags, ST_URI);
        }
        true
    }

    fn parse_header(&mut self, name: &[u8], value: &[u8]) -> bool {
        if http::is_cookie(name) {
            if value != b"U=test" {
                return false;
            }
            set(&self.flags, ST_COOKIE);
        }
        true
    }

    fn form_result(&mut self, buf: &mut NetBuffer, _ctx: &mut Context<'_>) -> FormResult {
        buf.append(SIMPLE_ANSWER);
        FormResult::OkClose
    }
}

#[test]
fn uri_query_and_cookie() {
    let flags = Arc::new(AtomicU32::new(0));
    let factory_flags = flags.clone();
    let server = TestServer::start(HttpEventFactory::new(move || {
        Box::new(FunctionalityHandler {
            flags: factory_flags.clone(),
        }) as Box<dyn HttpHandler>
    }));

    let answer = server.request(b"GET /test?a1&btest1 HTTP/1.0\r\nCookie: U=test\r\n\r\n");
    assert_eq!(answer, SIMPLE_ANSWER);
    assert!(has(&flags, ST_URI));
    assert!(has(&flags, ST_COOKIE));
}

const ANSWER1: &[u8] = b"HTTP/1.1 200 OK\r\nContent-length: 5\r\n\r\ntest1";
const ANSWER2: &[u8] = b"HTTP/1.1 200 OK\r\nContent-length: 5\r\n\r\ntest2";

struct KeepAliveHandler {
    flags: Arc<AtomicU32>,
    resets: Arc<AtomicU32>,
    file_name: String,
    keep_alive: bool,
}

impl KeepAliveHandler {
    fn new(flags: &Arc<AtomicU32>, resets: &Arc<AtomicU32>) -> KeepAliveHandler {
        KeepAliveHandler {
            flags: flags.clone(),
            resets: resets.clone(),
            file_name: String::new(),
            keep_alive: false,
        }
    }
}

impl HttpHandler for KeepAliveHandler {
    fn parse_uri(
        &mut self,
        _method: HttpMethod,
        version: HttpVersion,
        _host: &str,
        file_name: &str,
        query: &str,
    ) -> bool {
        if version == HttpVersion::V1_1 {
            set(&self.flags, ST_KEEP_ALIVE);
            self.keep_alive = true;
        }
        self.file_name = file_name.to_string();

        let mut a = 0;
        let mut b = String::new();
        let mut query = query;
        while let Some((param, value)) = http::next_param(&mut query) {
            match param {
                'a' => a = value.parse().unwrap_or(0),
                'b' => b = value.to_string(),
                _ => {}
            }
        }
        if file_name == "/test" && a == 1 && b == "test1" {
            set(&self.flags, ST_URI);
        }
        true
    }

    fn parse_header(&mut self, name: &[u8], value: &[u8]) -> bool {
        if let Some(keep_alive) = http::parse_keep_alive(name, value) {
            self.keep_alive = keep_alive;
            if keep_alive {
                set(&self.flags, ST_KEEP_ALIVE);
            } else {
                self.flags.fetch_and(!ST_KEEP_ALIVE, Ordering::Relaxed);
            }
        } else if http::is_cookie(name) {
            if value == b"U=test" {
                set(&self.flags, ST_COOKIE);
            }
        }
        true
    }

    fn form_result(&mut self, buf: &mut NetBuffer, _ctx: &mut Context<'_>) -> FormResult {
        match self.file_name.as_str() {
            "/test" => buf.append(ANSWER1),
            "/file/file2" => buf.append(ANSWER2),
            _ => return FormResult::Error,
        }
        if self.keep_alive {
            FormResult::OkKeepAlive
        } else {
            FormResult::OkClose
        }
    }

    fn reset(&mut self) -> bool {
        if self.keep_alive {
            self.resets.fetch_add(1, Ordering::Relaxed);
            self.file_name.clear();
            self.keep_alive = false;
            true
        } else {
            false
        }
    }
}

fn keep_alive_server(flags: &Arc<AtomicU32>, resets: &Arc<AtomicU32>) -> TestServer {
    let factory_flags = flags.clone();
    let factory_resets = resets.clone();
    TestServer::start(HttpEventFactory::new(move || {
        Box::new(KeepAliveHandler::new(&factory_flags, &factory_resets)) as Box<dyn HttpHandler>
    }))
}

#[test]
fn keep_alive_flag_follows_version_and_header() {
    let flags = Arc::new(AtomicU32::new(0));
    let resets = Arc::new(AtomicU32::new(0));
    let server = keep_alive_server(&flags, &resets);

    let mut conn = server.connect();
    let answer = server.request_on(
        &mut conn,
        b"GET /test?a1&btest1 HTTP/1.0\r\nCookie: U=test\r\n\r\n",
    );
    assert_eq!(answer, ANSWER1);
    assert!(has(&flags, ST_COOKIE));
    assert!(has(&flags, ST_URI));
    assert!(!has(&flags, ST_KEEP_ALIVE));
    drop(conn);

    let mut conn = server.connect();
    let answer = server.request_on(
        &mut conn,
        b"GET /test?a1&btest1 HTTP/1.0\r\nCookie: U=test\r\nConnection:  keep-Alive\r\n\r\n",
    );
    assert_eq!(answer, ANSWER1);
    assert!(has(&flags, ST_KEEP_ALIVE));
    drop(conn);

    let mut conn = server.connect();
    let _ = server.request_on(&mut conn, b"GET / HTTP/1.1\r\n\r\n");
    assert!(has(&flags, ST_KEEP_ALIVE));
    drop(conn);

    flags.store(0, Ordering::Relaxed);
    let mut conn = server.connect();
    let _ = server.request_on(&mut conn, b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(!has(&flags, ST_KEEP_ALIVE));
}

#[test]
fn two_requests_reuse_one_connection() {
    let flags = Arc::new(AtomicU32::new(0));
    let resets = Arc::new(AtomicU32::new(0));
    let server = keep_alive_server(&flags, &resets);

    let mut conn = server.connect();

    let answer = server.request_on(
        &mut conn,
        b"GET /test?a1&btest1 HTTP/1.1\r\nCookie: U=test\r\n\r\n",
    );
    assert_eq!(answer, ANSWER1);
    assert!(has(&flags, ST_KEEP_ALIVE));

    let answer = server.request_on(
        &mut conn,
        b"GET /file/file2?a2&btest2 HTTP/1.1\r\nConnection: close\r\n\r\n",
    );
    assert_eq!(answer, ANSWER2);
    assert!(!has(&flags, ST_KEEP_ALIVE));

    // the server closed after the explicit close
    let mut rest = Vec::new();
    assert_eq!(conn.read_to_end(&mut rest).unwrap(), 0);
}

#[test]
fn reset_hook_runs_between_kept_alive_requests() {
    let flags = Arc::new(AtomicU32::new(0));
    let resets = Arc::new(AtomicU32::new(0));
    let server = keep_alive_server(&flags, &resets);

    let mut conn = server.connect();
    assert_eq!(
        server.request_on(&mut conn, b"GET /test?a1&btest1 HTTP/1.1\r\n\r\n"),
        ANSWER1
    );
    assert_eq!(
        server.request_on(&mut conn, b"GET /test?a1&btest1 HTTP/1.1\r\n\r\n"),
        ANSWER1
    );
    assert_eq!(
        server.request_on(
            &mut conn,
            b"GET /test?a1&btest1 HTTP/1.1\r\nConnection: close\r\n\r\n"
        ),
        ANSWER1
    );

    let mut rest = Vec::new();
    assert_eq!(conn.read_to_end(&mut rest).unwrap(), 0);

    assert_eq!(resets.load(Ordering::Relaxed), 2);
}

const POST_QUERY: &[u8] = b"a1&bpost1234&cblablabla";

struct PostHandler {
    flags: Arc<AtomicU32>,
    a: i32,
    b: String,
    content_length: usize,
}

impl PostHandler {
    fn parse_query(&mut self, query: &str) {
        let mut query = query;
        while let Some((param, value)) = http::next_param(&mut query) {
            match param {
                'a' => self.a = value.parse().unwrap_or(0),
                'b' => self.b = value.to_string(),
                _ => {}
            }
        }
        if self.a == 1 && self.b == "post1234" {
            set(&self.flags, ST_URI);
        }
    }
}

impl HttpHandler for PostHandler {
    fn parse_uri(
        &mut self,
        method: HttpMethod,
        _version: HttpVersion,
        _host: &str,
        file_name: &str,
        query: &str,
    ) -> bool {
        if method == HttpMethod::Post {
            set(&self.flags, ST_POST);
        }
        if file_name != "/test" {
            return false;
        }
        self.parse_query(query);
        true
    }

    fn parse_header(&mut self, name: &[u8], value: &[u8]) -> bool {
        if let Some(content_length) = http::parse_content_length(name, value) {
            self.content_length = content_length;
            if content_length == POST_QUERY.len() {
                set(&self.flags, ST_CONTENT_LENGTH);
            }
        } else if http::is_cookie(name) && value == b"U=test" {
            set(&self.flags, ST_COOKIE);
        }
        true
    }

    fn parse_post(
        &mut self,
        body_start: usize,
        buf: &mut NetBuffer,
        _ctx: &mut Context<'_>,
    ) -> PostState {
        if body_start + self.content_length <= buf.len() {
            let body = buf.as_slice()[body_start..body_start + self.content_length].to_vec();
            self.parse_query(&String::from_utf8_lossy(&body));
            PostState::Received
        } else {
            PostState::NeedMore
        }
    }

    fn form_result(&mut self, buf: &mut NetBuffer, _ctx: &mut Context<'_>) -> FormResult {
        buf.append(SIMPLE_ANSWER);
        FormResult::OkClose
    }
}

fn post_server(flags: &Arc<AtomicU32>) -> TestServer {
    let factory_flags = flags.clone();
    TestServer::start(HttpEventFactory::new(move || {
        Box::new(PostHandler {
            flags: factory_flags.clone(),
            a: 0,
            b: String::new(),
            content_length: 0,
        }) as Box<dyn HttpHandler>
    }))
}

#[test]
fn post_body_parses() {
    let flags = Arc::new(AtomicU32::new(0));
    let server = post_server(&flags);

    let mut request = Vec::new();
    request.extend_from_slice(b"POST /test?a1&ktest1 HTTP/1.0\r\nCookie: U=test\r\n");
    request.extend_from_slice(format!("Content-Length: {}\r\n\r\n", POST_QUERY.len()).as_bytes());
    request.extend_from_slice(POST_QUERY);

    let answer = server.request(&request);
    assert_eq!(answer, SIMPLE_ANSWER);
    assert!(has(&flags, ST_POST));
    assert!(has(&flags, ST_COOKIE));
    assert!(has(&flags, ST_CONTENT_LENGTH));
    assert!(has(&flags, ST_URI));
}

#[test]
fn post_body_larger_than_one_read() {
    let flags = Arc::new(AtomicU32::new(0));
    let server = post_server(&flags);

    const BIG: usize = 128_000;
    let mut request = Vec::new();
    request.extend_from_slice(b"POST /test?a1&ktest1 HTTP/1.0\r\nCookie: U=test\r\n");
    request
        .extend_from_slice(format!("Content-Length: {}\r\n\r\n", BIG + POST_QUERY.len()).as_bytes());
    request.extend_from_slice(&vec![b'x'; BIG]);
    request.extend_from_slice(POST_QUERY);

    let answer = server.request(&request);
    assert_eq!(answer, SIMPLE_ANSWER);
    assert!(has(&flags, ST_POST));
    assert!(has(&flags, ST_URI));
}

const ANSWER_PART1: &[u8] = b"HTTP/1.0 200 OK\r\n\r\n";
const ANSWER_PART2: &[u8] = b"Next data bla bla";

struct PartialHandler {
    flags: Arc<AtomicU32>,
}

impl HttpHandler for PartialHandler {
    fn parse_uri(
        &mut self,
        _method: HttpMethod,
        _version: HttpVersion,
        _host: &str,
        _file_name: &str,
        _query: &str,
    ) -> bool {
        true
    }

    fn form_result(&mut self, buf: &mut NetBuffer, _ctx: &mut Context<'_>) -> FormResult {
        set(&self.flags, ST_FORM_CALLED);
        buf.append(ANSWER_PART1);
        FormResult::OkPartialSend
    }

    fn get_more_data(&mut self, buf: &mut NetBuffer, _ctx: &mut Context<'_>) -> FormResult {
        set(&self.flags, ST_MORE_DATA_CALLED);
        buf.append(ANSWER_PART2);
        FormResult::OkClose
    }
}

#[test]
fn partial_send_concatenates_pieces() {
    let flags = Arc::new(AtomicU32::new(0));
    let factory_flags = flags.clone();
    let server = TestServer::start(HttpEventFactory::new(move || {
        Box::new(PartialHandler {
            flags: factory_flags.clone(),
        }) as Box<dyn HttpHandler>
    }));

    let answer = server.request(b"GET / HTTP/1.0\r\n\r\n");

    let mut expected = Vec::new();
    expected.extend_from_slice(ANSWER_PART1);
    expected.extend_from_slice(ANSWER_PART2);
    assert_eq!(answer, expected);
    assert!(has(&flags, ST_FORM_CALLED | ST_MORE_DATA_CALLED));
}

struct WaitingHandler {
    flags: Arc<AtomicU32>,
}

impl HttpHandler for WaitingHandler {
    fn parse_uri(
        &mut self,
        _method: HttpMethod,
        _version: HttpVersion,
        _host: &str,
        _file_name: &str,
        _query: &str,
    ) -> bool {
        true
    }

    fn form_result(&mut self, _buf: &mut NetBuffer, ctx: &mut Context<'_>) -> FormResult {
        let resumer = ctx.resumer();
        let flags = self.flags.clone();

        let timer = TimerEvent::oneshot(Duration::from_millis(100), move |_ctx| {
            flags.fetch_or(ST_TIMER_FIRED, Ordering::Relaxed);
            resumer.send(Box::new(http::ExternalAnswer {
                result: FormResult::OkClose,
                data: SIMPLE_ANSWER.to_vec(),
            }));
        })
        .expect("timer event");

        ctx.add_event(Box::new(timer));
        FormResult::OkWait
    }
}

#[test]
fn external_event_resumes_a_waiting_request() {
    let flags = Arc::new(AtomicU32::new(0));
    let factory_flags = flags.clone();
    let server = TestServer::start(HttpEventFactory::new(move || {
        Box::new(WaitingHandler {
            flags: factory_flags.clone(),
        }) as Box<dyn HttpHandler>
    }));

    let answer = server.request(b"GET / HTTP/1.0\r\n\r\n");
    assert_eq!(answer, SIMPLE_ANSWER);
    assert!(has(&flags, ST_TIMER_FIRED));
}

#[test]
fn request_size_guard_is_exact() {
    let flags = Arc::new(AtomicU32::new(0));
    let config = HttpConfig {
        max_request_size: 256,
        ..HttpConfig::default()
    };
    let factory_flags = flags.clone();
    let server = TestServer::start_with_config(
        config,
        HttpEventFactory::new(move || {
            Box::new(SimpleHandler::new(&factory_flags)) as Box<dyn HttpHandler>
        }),
    );

    // pad a request up to exactly 256 bytes
    let skeleton = b"GET / HTTP/1.0\r\nX-Pad: \r\n\r\n".len();
    let mut request = Vec::new();
    request.extend_from_slice(b"GET / HTTP/1.0\r\nX-Pad: ");
    request.extend_from_slice(&vec![b'p'; 256 - skeleton]);
    request.extend_from_slice(b"\r\n\r\n");
    assert_eq!(request.len(), 256);

    let answer = server.request(&request);
    assert_eq!(answer, SIMPLE_ANSWER);

    // one byte more is rejected
    let mut request = Vec::new();
    request.extend_from_slice(b"GET / HTTP/1.0\r\nX-Pad: ");
    request.extend_from_slice(&vec![b'p'; 257 - skeleton]);
    request.extend_from_slice(b"\r\n\r\n");
    assert_eq!(request.len(), 257);

    let answer = server.request(&request);
    let text = String::from_utf8_lossy(&answer);
    assert!(text.starts_with("HTTP/1.1 400 Bad Request"), "{}", text);
}

#[test]
fn chunk_count_guard_closes_slow_loris() {
    let flags = Arc::new(AtomicU32::new(0));
    let config = HttpConfig {
        max_chunk_count: 2,
        ..HttpConfig::default()
    };
    let factory_flags = flags.clone();
    let server = TestServer::start_with_config(
        config,
        HttpEventFactory::new(move || {
            Box::new(SimpleHandler::new(&factory_flags)) as Box<dyn HttpHandler>
        }),
    );

    let mut conn = server.connect();
    conn.set_nodelay(true).unwrap();

    let pieces: [&[u8]; 5] = [b"GET ", b"/ ", b"HTTP/1.0", b"\r\n", b"X: y"];
    for piece in pieces {
        if conn.write_all(piece).is_err() {
            break;
        }
        std::thread::sleep(Duration::from_millis(150));
    }

    let mut answer = Vec::new();
    let _ = conn.read_to_end(&mut answer);
    let text = String::from_utf8_lossy(&answer);
    assert!(text.starts_with("HTTP/1.1 400 Bad Request"), "{}", text);
}
