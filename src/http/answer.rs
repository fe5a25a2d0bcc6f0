//! Response composition: status line, the standard header block, and a
//! back-filled `Content-Length`.

use log::error;

use crate::buffer::NetBuffer;

use super::date;

pub const HTTP_OK_STATUS: &str = "HTTP/1.1 200 OK\r\n";

pub const CONNECTION_KEEP_ALIVE: &str = "Connection: Keep-Alive\r\n";
pub const CONNECTION_CLOSE: &str = "Connection: Close\r\n";

const CONTENT_LENGTH_NAME: &str = "Content-Length: ";
const CONTENT_LENGTH_PLACEHOLDER: &str = "Content-Length: 0000000000\r\n\r\n";

/// Composes one response into a [`NetBuffer`].
///
/// The constructor writes the status line, `Content-Type`, the connection
/// header and a ten-digit `Content-Length` placeholder; the body is
/// whatever gets appended afterwards, and `set_content_length` back-fills
/// the placeholder once the body length is known.
pub struct HttpAnswer<'a> {
    buf: &'a mut NetBuffer,
    content_length_start: usize,
    headers_end: usize,
}

impl<'a> HttpAnswer<'a> {
    pub fn new(
        buf: &'a mut NetBuffer,
        status: &str,
        content_type: &str,
        keep_alive: bool,
    ) -> HttpAnswer<'a> {
        buf.clear();
        buf.append(status.as_bytes());
        buf.append(b"Content-Type: ");
        buf.append(content_type.as_bytes());
        buf.append(b"\r\n");
        buf.append(if keep_alive {
            CONNECTION_KEEP_ALIVE.as_bytes()
        } else {
            CONNECTION_CLOSE.as_bytes()
        });

        let content_length_start = buf.len();
        buf.append(CONTENT_LENGTH_PLACEHOLDER.as_bytes());
        let headers_end = buf.len();

        HttpAnswer {
            buf,
            content_length_start,
            headers_end,
        }
    }

    /// Splices extra header lines (each ending in `\r\n`) in front of the
    /// blank line.
    pub fn add_headers(&mut self, headers: &str) {
        let len = self.buf.len();
        self.buf.truncate(len - 2);
        self.buf.append(headers.as_bytes());
        self.buf.append(b"\r\n");
        self.headers_end = self.buf.len();
    }

    /// Splices a `Last-Modified` line for `unix` in front of the blank
    /// line.
    pub fn add_last_modified(&mut self, unix: i64) {
        let len = self.buf.len();
        self.buf.truncate(len - 2);
        self.buf.append(b"Last-Modified: ");
        self.buf.append(date::format(unix).as_bytes());
        self.buf.append(b"\r\n\r\n");
        self.headers_end = self.buf.len();
    }

    /// Appends body bytes.
    pub fn add(&mut self, data: &[u8]) {
        self.buf.append(data);
    }

    /// Back-fills `Content-Length` from the composed body.
    pub fn set_content_length(&mut self) {
        let body = self.buf.len() - self.headers_end;
        self.set_content_length_to(body as u64);
    }

    /// Back-fills an explicit `Content-Length`, e.g. for a HEAD answer.
    pub fn set_content_length_to(&mut self, content_length: u64) {
        if content_length > 9_999_999_999 {
            error!("content length {} does not fit ten digits", content_length);
            return;
        }
        let digits = format!("{:010}", content_length);
        let at = self.content_length_start + CONTENT_LENGTH_NAME.len();
        self.buf.write_at(at, digits.as_bytes());
    }

    /// Offset of the first body byte.
    pub fn headers_end(&self) -> usize {
        self.headers_end
    }
}
