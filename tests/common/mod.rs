//! End-to-end harness: a real listening socket, a one-worker group and an
//! accept thread.

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use hive_io::http::{HttpConfig, HttpScratchFactory};
use hive_io::reactor::{AcceptThread, EventFactory, WorkerGroup};

pub struct TestServer {
    pub addr: SocketAddr,
    pub group: Arc<WorkerGroup>,
}

impl TestServer {
    pub fn start<F: EventFactory + 'static>(factory: F) -> TestServer {
        TestServer::start_with_config(HttpConfig::default(), factory)
    }

    pub fn start_with_config<F: EventFactory + 'static>(
        config: HttpConfig,
        factory: F,
    ) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let group = Arc::new(
            WorkerGroup::new(&HttpScratchFactory::new(config), 1, 32).expect("worker group"),
        );

        AcceptThread::spawn(group.clone(), listener, Arc::new(factory)).expect("accept thread");

        TestServer { addr, group }
    }

    pub fn connect(&self) -> TcpStream {
        let conn = TcpStream::connect(self.addr).expect("connect");
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        conn
    }

    /// One-shot request: connect, send everything, read to end-of-stream.
    pub fn request(&self, request: &[u8]) -> Vec<u8> {
        let mut conn = self.connect();
        conn.write_all(request).expect("send request");

        let mut answer = Vec::new();
        conn.read_to_end(&mut answer).expect("read answer");
        answer
    }

    /// Request on an existing connection; reads one HTTP answer (headers
    /// plus `Content-Length` body bytes) so the connection can be reused.
    pub fn request_on(&self, conn: &mut TcpStream, request: &[u8]) -> Vec<u8> {
        conn.write_all(request).expect("send request");
        read_http_answer(conn).expect("read answer")
    }
}

pub fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

pub fn read_http_answer(conn: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];

    let headers_end = loop {
        if let Some(i) = find_terminator(&data) {
            break i + 4;
        }
        let n = conn.read(&mut chunk)?;
        if n == 0 {
            return Ok(data);
        }
        data.extend_from_slice(&chunk[..n]);
    };

    let content_length = content_length_of(&data[..headers_end]);
    while data.len() < headers_end + content_length {
        let n = conn.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
    }

    Ok(data)
}

fn content_length_of(headers: &[u8]) -> usize {
    let text = String::from_utf8_lossy(headers);
    for line in text.split("\r\n") {
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            let digits: String = value
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            return digits.parse().unwrap_or(0);
        }
    }
    0
}

/// Polls `check` for up to two seconds.
pub fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}
