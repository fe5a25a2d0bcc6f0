//! The HTTP/1.x protocol engine.
//!
//! [`HttpEvent`] is a reactor event that parses requests incrementally out
//! of a pooled buffer and drives a small response state machine. Protocol
//! interpretation is delegated to an [`HttpHandler`]; the engine owns the
//! wire format, the guards and the keep-alive lifecycle.

pub mod answer;
pub mod date;

mod event;

pub use event::{HttpConfig, HttpEvent, HttpEventFactory, HttpScratch, HttpScratchFactory};

use crate::buffer::NetBuffer;
use crate::reactor::Context;

/// The request verbs the engine recognises on the first line. Anything
/// else parses as `Unknown` and is left to the handler to refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Unknown,
    Get,
    Post,
    Head,
    Put,
    Delete,
    Options,
    Propfind,
    Mkcol,
}

impl HttpMethod {
    pub fn parse(token: &[u8]) -> HttpMethod {
        if token.eq_ignore_ascii_case(b"GET") {
            HttpMethod::Get
        } else if token.eq_ignore_ascii_case(b"POST") {
            HttpMethod::Post
        } else if token.eq_ignore_ascii_case(b"HEAD") {
            HttpMethod::Head
        } else if token.eq_ignore_ascii_case(b"PUT") {
            HttpMethod::Put
        } else if token.eq_ignore_ascii_case(b"DELETE") {
            HttpMethod::Delete
        } else if token.eq_ignore_ascii_case(b"OPTIONS") {
            HttpMethod::Options
        } else if token.eq_ignore_ascii_case(b"PROPFIND") {
            HttpMethod::Propfind
        } else if token.eq_ignore_ascii_case(b"MKCOL") {
            HttpMethod::Mkcol
        } else {
            HttpMethod::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Unknown => "UNKNOWN",
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Head => "HEAD",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Propfind => "PROPFIND",
            HttpMethod::Mkcol => "MKCOL",
        }
    }
}

/// Protocol version from the request line. Anything that is not exactly
/// `HTTP/1.1` is treated as 1.0; a first line without an `HTTP/` token is
/// a protocol error upstream of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    V1_0,
    V1_1,
}

/// What `parse_post` tells the engine about the body so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostState {
    /// The body is complete; move to forming the response.
    Received,
    /// Keep reading.
    NeedMore,
    /// The body is unacceptable; answer with an error.
    Error,
}

/// What `form_result` (and `get_more_data`) tell the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormResult {
    /// Send the buffer, then close.
    OkClose,
    /// Send the buffer, then reset for the next request on the connection.
    OkKeepAlive,
    /// Nothing to send yet; an external collaborator resumes the event
    /// later through [`crate::reactor::Resumer`].
    OkWait,
    /// Send the buffer, then ask `get_more_data` for the next piece.
    OkPartialSend,
    /// Ask `form_error` / emit the built-in 400.
    Error,
}

/// The payload an external collaborator passes back to a suspended
/// request: the bytes to send plus how to continue afterwards.
pub struct ExternalAnswer {
    pub result: FormResult,
    pub data: Vec<u8>,
}

/// The protocol seam of the engine.
///
/// The engine feeds it the broken-up request; the handler decides what the
/// request means and composes the response bytes.
pub trait HttpHandler: Send {
    /// First line of the request, split into verb, version, host (only
    /// when the URL was absolute), file name and query.
    fn parse_uri(
        &mut self,
        method: HttpMethod,
        version: HttpVersion,
        host: &str,
        file_name: &str,
        query: &str,
    ) -> bool;

    /// One header line, name and value. Returning `false` fails the
    /// request.
    fn parse_header(&mut self, _name: &[u8], _value: &[u8]) -> bool {
        true
    }

    /// Called after the header terminator with the body received so far;
    /// `body_start` is the offset of the body in `buf`. Called again after
    /// every further read while it answers [`PostState::NeedMore`].
    fn parse_post(
        &mut self,
        _body_start: usize,
        _buf: &mut NetBuffer,
        _ctx: &mut Context<'_>,
    ) -> PostState {
        PostState::Received
    }

    /// Composes the response into `buf` (the engine has cleared it).
    fn form_result(&mut self, buf: &mut NetBuffer, ctx: &mut Context<'_>) -> FormResult;

    /// Next piece of a partial-send response.
    fn get_more_data(&mut self, _buf: &mut NetBuffer, _ctx: &mut Context<'_>) -> FormResult {
        FormResult::Error
    }

    /// Composes an error response; declining makes the engine emit a bare
    /// `400 Bad Request` and close.
    fn form_error(&mut self, _buf: &mut NetBuffer) -> Option<FormResult> {
        None
    }

    /// Prepares the handler for the next request on a kept-alive
    /// connection; declining closes the connection instead.
    fn reset(&mut self) -> bool {
        false
    }
}

/// Recognises `Connection` and answers whether the client asked to keep
/// the connection alive.
pub fn parse_keep_alive(name: &[u8], value: &[u8]) -> Option<bool> {
    if !name.eq_ignore_ascii_case(b"connection") {
        return None;
    }
    Some(value.eq_ignore_ascii_case(b"keep-alive"))
}

/// Recognises `Content-Length`; a malformed value parses as zero, exactly
/// like the C library's loose integer scan clients rely on.
pub fn parse_content_length(name: &[u8], value: &[u8]) -> Option<usize> {
    if !name.eq_ignore_ascii_case(b"content-length") {
        return None;
    }

    let mut n: usize = 0;
    for &b in value {
        if !b.is_ascii_digit() {
            break;
        }
        n = n.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Some(n)
}

/// Recognises `Host`.
pub fn parse_host(name: &[u8], value: &[u8]) -> Option<String> {
    if !name.eq_ignore_ascii_case(b"host") {
        return None;
    }
    std::str::from_utf8(value).ok().map(str::to_string)
}

pub fn is_cookie(name: &[u8]) -> bool {
    name.eq_ignore_ascii_case(b"cookie")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadRange;

/// Recognises `Range: bytes=A-B`.
///
/// Half-open forms map to `(A, 0)` and `(-B, 0)`; an inverted range
/// canonicalises to `(0, 0)`; unknown units are a parse error.
pub fn parse_range(name: &[u8], value: &[u8]) -> Option<Result<(i64, u64), BadRange>> {
    if !name.eq_ignore_ascii_case(b"range") {
        return None;
    }
    Some(parse_range_value(value))
}

fn parse_range_value(value: &[u8]) -> Result<(i64, u64), BadRange> {
    const UNIT: &[u8] = b"bytes=";

    if value.len() < UNIT.len() || !value[..UNIT.len()].eq_ignore_ascii_case(UNIT) {
        return Err(BadRange);
    }

    let range = &value[UNIT.len()..];
    let dash = range.iter().position(|&b| b == b'-').ok_or(BadRange)?;
    let start_digits = &range[..dash];
    let end_digits = &range[dash + 1..];

    if start_digits.is_empty() {
        // suffix form: the last N bytes
        let n = parse_digits(end_digits).ok_or(BadRange)?;
        return Ok((-(n as i64), 0));
    }

    let start = parse_digits(start_digits).ok_or(BadRange)? as i64;

    if end_digits.is_empty() {
        return Ok((start, 0));
    }

    let end = parse_digits(end_digits).ok_or(BadRange)?;
    if start > end as i64 {
        return Ok((0, 0));
    }

    Ok((start, end))
}

fn parse_digits(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }

    let mut n: u64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        n = n.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }
    Some(n)
}

/// Steps through single-letter query parameters of the form `a1&btest1`:
/// the first byte names the parameter, the rest up to `&` is the value.
pub fn next_param<'a>(query: &mut &'a str) -> Option<(char, &'a str)> {
    while !query.is_empty() {
        let (piece, rest) = match query.find('&') {
            Some(i) => (&query[..i], &query[i + 1..]),
            None => (*query, ""),
        };
        *query = rest;

        let mut chars = piece.chars();
        if let Some(name) = chars.next() {
            return Some((name, chars.as_str()));
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn method_tokens() {
        assert_eq!(HttpMethod::parse(b"GET"), HttpMethod::Get);
        assert_eq!(HttpMethod::parse(b"propfind"), HttpMethod::Propfind);
        assert_eq!(HttpMethod::parse(b"BREW"), HttpMethod::Unknown);
    }

    #[test]
    fn keep_alive_recogniser() {
        assert_eq!(
            parse_keep_alive(b"Connection", b"keep-Alive"),
            Some(true)
        );
        assert_eq!(parse_keep_alive(b"Connection", b"close"), Some(false));
        assert_eq!(parse_keep_alive(b"Cookie", b"keep-alive"), None);
    }

    #[test]
    fn content_length_recogniser() {
        assert_eq!(parse_content_length(b"Content-Length", b"23"), Some(23));
        assert_eq!(parse_content_length(b"content-length", b"0"), Some(0));
        assert_eq!(parse_content_length(b"Content-Length", b"junk"), Some(0));
        assert_eq!(parse_content_length(b"Host", b"23"), None);
    }

    #[test]
    fn host_and_cookie_recognisers() {
        assert_eq!(
            parse_host(b"Host", b"example.org"),
            Some("example.org".to_string())
        );
        assert_eq!(parse_host(b"Range", b"x"), None);
        assert!(is_cookie(b"Cookie"));
        assert!(!is_cookie(b"Set-Cookie"));
    }

    #[test]
    fn range_forms() {
        assert_eq!(parse_range(b"Range", b"bytes=1-9"), Some(Ok((1, 9))));
        assert_eq!(parse_range(b"Range", b"bytes=100-"), Some(Ok((100, 0))));
        assert_eq!(parse_range(b"Range", b"bytes=-200"), Some(Ok((-200, 0))));
        assert_eq!(parse_range(b"Range", b"bytes=200-100"), Some(Ok((0, 0))));
        assert_eq!(parse_range(b"Range", b"lines=1-2"), Some(Err(BadRange)));
        assert_eq!(parse_range(b"Host", b"bytes=1-2"), None);
    }

    #[test]
    fn query_params() {
        let mut query = "a1&btest1";
        assert_eq!(next_param(&mut query), Some(('a', "1")));
        assert_eq!(next_param(&mut query), Some(('b', "test1")));
        assert_eq!(next_param(&mut query), None);

        let mut empty = "";
        assert_eq!(next_param(&mut empty), None);

        let mut lone = "&&x";
        assert_eq!(next_param(&mut lone), Some(('x', "")));
    }
}
