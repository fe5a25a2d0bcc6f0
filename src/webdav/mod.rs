//! A WebDAV request handler for the HTTP engine.
//!
//! Implements the verb set OPTIONS / PROPFIND / MKCOL / PUT / DELETE /
//! GET / HEAD (POST is treated as PUT) over HTTP/1.1 only, with the
//! Overwrite / Host / Content-Length header vocabulary. Storage semantics
//! stay with the embedder behind [`DavExtension`]; this layer owns the
//! wire behavior: request bookkeeping, body spilling, the PROPFIND XML
//! subset and the response blocks.

use std::fs::File;
use std::io::Write;

use indexmap::IndexSet;
use log::error;

use crate::buffer::NetBuffer;
use crate::http::answer::HttpAnswer;
use crate::http::{
    self, FormResult, HttpHandler, HttpMethod, HttpScratch, HttpVersion, PostState,
};
use crate::reactor::Context;

pub const DEFAULT_POST_IN_MEMORY_SIZE: usize = 64 * 1024;

const CONTENT_TYPE_XML: &str = "text/xml; charset=\"utf-8\"";

const HTTP_CREATED_STATUS: &str = "HTTP/1.1 201 Created\r\n";
const HTTP_NO_CONTENT_STATUS: &str = "HTTP/1.1 204 No Content\r\n";
const HTTP_MULTI_STATUS: &str = "HTTP/1.1 207 Multi-Status\r\n";

const ALLOW_BLOCK: &str =
    "Allow: OPTIONS, GET, HEAD, POST, PUT, DELETE\r\nAllow: MKCOL, PROPFIND, PROPPATCH\r\nDAV: 1\r\n";

const SUPPORTED_METHOD_SET: &str = "<supported-method-set>\
<supported-method name=\"COPY\"/>\
<supported-method name=\"DELETE\"/>\
<supported-method name=\"GET\"/>\
<supported-method name=\"HEAD\"/>\
<supported-method name=\"MKCOL\"/>\
<supported-method name=\"MOVE\"/>\
<supported-method name=\"OPTIONS\"/>\
<supported-method name=\"POST\"/>\
<supported-method name=\"PROPFIND\"/>\
<supported-method name=\"PROPPATCH\"/>\
<supported-method name=\"PUT\"/>\
</supported-method-set>";

/// The statuses this layer answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavStatus {
    Ok,
    BadRequest,
    MethodNotAllowed,
    Conflict,
    LengthRequired,
    ServiceUnavailable,
    VersionNotSupported,
    InsufficientStorage,
}

impl DavStatus {
    pub fn status_line(self) -> &'static str {
        match self {
            DavStatus::Ok => "HTTP/1.1 200 OK\r\n",
            DavStatus::BadRequest => "HTTP/1.1 400 Bad Request\r\n",
            DavStatus::MethodNotAllowed => "HTTP/1.1 405 Method Not Allowed\r\n",
            DavStatus::Conflict => "HTTP/1.1 409 Conflict\r\n",
            DavStatus::LengthRequired => "HTTP/1.1 411 Length Required\r\n",
            DavStatus::ServiceUnavailable => "HTTP/1.1 503 Service Unavailable\r\n",
            DavStatus::VersionNotSupported => "HTTP/1.1 505 HTTP Version Not Supported\r\n",
            DavStatus::InsufficientStorage => "HTTP/1.1 507 Insufficient Storage\r\n",
        }
    }
}

/// Where a PUT body ended up.
#[derive(Debug)]
pub enum PutBody {
    /// Small bodies accumulate here.
    Memory(Vec<u8>),
    /// Oversized bodies stream into an unlinked temporary file; `written`
    /// counts the spilled bytes.
    Spilled { file: File, written: u64 },
}

impl PutBody {
    pub fn is_spilled(&self) -> bool {
        matches!(self, PutBody::Spilled { .. })
    }
}

/// Everything parsed out of one DAV request; reset between keep-alive
/// requests.
#[derive(Debug)]
pub struct DavRequest {
    pub method: HttpMethod,
    pub host: String,
    pub file_name: String,
    pub content_length: usize,
    pub overwrite: bool,
    pub keep_alive: bool,
    pub body: PutBody,
    /// PROPFIND property names, in request order.
    pub properties: IndexSet<String>,
}

impl DavRequest {
    fn new() -> DavRequest {
        DavRequest {
            method: HttpMethod::Unknown,
            host: String::new(),
            file_name: String::new(),
            content_length: 0,
            overwrite: false,
            keep_alive: false,
            body: PutBody::Memory(Vec::new()),
            properties: IndexSet::new(),
        }
    }

    fn reset(&mut self) {
        *self = DavRequest::new();
    }
}

/// The embedder seam: storage operations and property interpretation.
/// Defaults refuse what the layer cannot do generically and accept the
/// rest, matching the base behavior embedders override.
pub trait DavExtension: Send {
    fn mkcol(&mut self, _req: &DavRequest) -> Result<(), DavStatus> {
        Err(DavStatus::MethodNotAllowed)
    }

    fn put(&mut self, _req: &mut DavRequest) -> Result<(), DavStatus> {
        Ok(())
    }

    fn delete(&mut self, _req: &DavRequest) -> Result<(), DavStatus> {
        Ok(())
    }

    fn get(&mut self, _req: &DavRequest, _buf: &mut NetBuffer) -> Result<FormResult, DavStatus> {
        Err(DavStatus::MethodNotAllowed)
    }

    fn head(&mut self, _req: &DavRequest, _buf: &mut NetBuffer) -> Result<FormResult, DavStatus> {
        Err(DavStatus::MethodNotAllowed)
    }

    /// A PROPFIND property this layer does not know; returning `false`
    /// fails the request.
    fn propfind_property(&mut self, _name: &str) -> bool {
        true
    }
}

/// The always-refusing extension; useful for OPTIONS/PROPFIND-only
/// endpoints and as the base for tests.
#[derive(Debug, Default)]
pub struct DefaultDavExtension;

impl DavExtension for DefaultDavExtension {}

/// The WebDAV [`HttpHandler`].
pub struct WebDavHandler<E: DavExtension> {
    ext: E,
    req: DavRequest,
    error: DavStatus,
    want_method_set: bool,
    split: bool,
    content_left: usize,
    has_content_length: bool,
}

impl Default for WebDavHandler<DefaultDavExtension> {
    fn default() -> Self {
        WebDavHandler::new(DefaultDavExtension)
    }
}

impl<E: DavExtension> WebDavHandler<E> {
    pub fn new(ext: E) -> WebDavHandler<E> {
        WebDavHandler {
            ext,
            req: DavRequest::new(),
            error: DavStatus::BadRequest,
            want_method_set: false,
            split: false,
            content_left: 0,
            has_content_length: false,
        }
    }

    pub fn extension(&self) -> &E {
        &self.ext
    }

    pub fn extension_mut(&mut self) -> &mut E {
        &mut self.ext
    }

    fn keep_alive_state(&self) -> FormResult {
        if self.req.keep_alive {
            FormResult::OkKeepAlive
        } else {
            FormResult::OkClose
        }
    }

    fn parse_overwrite(&mut self, name: &[u8], value: &[u8]) -> bool {
        if !name.eq_ignore_ascii_case(b"overwrite") {
            return false;
        }

        for &b in value {
            match b.to_ascii_uppercase() {
                b'T' => {
                    self.req.overwrite = true;
                    break;
                }
                b'F' => {
                    self.req.overwrite = false;
                    break;
                }
                _ => {}
            }
        }
        true
    }

    fn save_chunk(&mut self, data: &[u8], tmp_path: &std::path::Path) -> bool {
        if !self.req.body.is_spilled() {
            let file = match tempfile::tempfile_in(tmp_path) {
                Ok(file) => file,
                Err(err) => {
                    error!(
                        "cannot create a temporary file in {} for a request body: {}",
                        tmp_path.display(),
                        err
                    );
                    self.error = DavStatus::InsufficientStorage;
                    return false;
                }
            };
            self.req.body = PutBody::Spilled { file, written: 0 };
        }

        if let PutBody::Spilled { file, written } = &mut self.req.body {
            if let Err(err) = file.write_all(data) {
                error!("cannot save a request body chunk: {}", err);
                self.error = DavStatus::InsufficientStorage;
                return false;
            }
            *written += data.len() as u64;
        }

        self.content_left = self.content_left.saturating_sub(data.len());
        true
    }

    fn save_partial_put(
        &mut self,
        body_start: usize,
        buf: &mut NetBuffer,
        max_in_memory: usize,
        tmp_path: &std::path::Path,
    ) -> PostState {
        if self.split {
            if self.content_left <= buf.len() {
                let left = self.content_left;
                if self.save_chunk(&buf.as_slice()[..left], tmp_path) {
                    PostState::Received
                } else {
                    PostState::Error
                }
            } else if buf.len() >= buf.capacity() / 2 {
                let saved = self.save_chunk(buf.as_slice(), tmp_path);
                buf.clear();
                if saved {
                    PostState::NeedMore
                } else {
                    PostState::Error
                }
            } else {
                PostState::NeedMore
            }
        } else {
            let content_length = self.req.content_length;

            if body_start + content_length <= buf.len() {
                let body = buf.as_slice()[body_start..body_start + content_length].to_vec();
                self.req.body = PutBody::Memory(body);
                return PostState::Received;
            }

            if content_length > max_in_memory && buf.len() >= buf.capacity() / 2 {
                self.split = true;
                self.content_left = content_length;
                let saved = self.save_chunk(&buf.as_slice()[body_start..], tmp_path);
                buf.clear();
                if !saved {
                    return PostState::Error;
                }
            }

            PostState::NeedMore
        }
    }

    fn parse_propfind(&mut self, data: &[u8]) -> bool {
        let text = match std::str::from_utf8(data) {
            Ok(text) => text,
            Err(_) => {
                error!("PROPFIND body is not valid UTF-8");
                self.error = DavStatus::BadRequest;
                return false;
            }
        };

        let doc = match roxmltree::Document::parse(text) {
            Ok(doc) => doc,
            Err(err) => {
                error!("cannot parse the PROPFIND XML: {}", err);
                self.error = DavStatus::BadRequest;
                return false;
            }
        };

        let root = doc.root_element();
        if root.tag_name().name() != "propfind" {
            error!("bad PROPFIND root element {}", root.tag_name().name());
            self.error = DavStatus::BadRequest;
            return false;
        }

        for child in root.children().filter(|n| n.is_element()) {
            if child.tag_name().name() != "prop" {
                continue;
            }
            for prop in child.children().filter(|n| n.is_element()) {
                let name = prop.tag_name().name();
                self.req.properties.insert(name.to_string());
                if name == "supported-method-set" {
                    self.want_method_set = true;
                } else if !self.ext.propfind_property(name) {
                    return false;
                }
            }
        }

        true
    }

    fn form_options(&mut self, buf: &mut NetBuffer) -> FormResult {
        let mut answer = HttpAnswer::new(
            buf,
            DavStatus::Ok.status_line(),
            CONTENT_TYPE_XML,
            self.req.keep_alive,
        );
        answer.add_headers(ALLOW_BLOCK);
        answer.set_content_length();
        self.keep_alive_state()
    }

    fn form_propfind(&mut self, buf: &mut NetBuffer) -> FormResult {
        let mut answer = HttpAnswer::new(
            buf,
            HTTP_MULTI_STATUS,
            CONTENT_TYPE_XML,
            self.req.keep_alive,
        );
        answer.add(b"<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n<multistatus xmlns=\"DAV:\">");
        if self.want_method_set {
            answer.add(b"<response><href>http://");
            answer.add(self.req.host.as_bytes());
            answer.add(self.req.file_name.as_bytes());
            answer.add(b"</href><propstat><prop>");
            answer.add(SUPPORTED_METHOD_SET.as_bytes());
            answer.add(b"</prop><status>HTTP/1.1 200 OK</status></propstat></response>");
        }
        answer.add(b"</multistatus>");
        answer.set_content_length();
        self.keep_alive_state()
    }

    fn form_put(&mut self, buf: &mut NetBuffer) -> FormResult {
        match self.ext.put(&mut self.req) {
            Ok(()) => {
                let mut answer = HttpAnswer::new(
                    buf,
                    HTTP_CREATED_STATUS,
                    CONTENT_TYPE_XML,
                    self.req.keep_alive,
                );
                answer.set_content_length();
                self.keep_alive_state()
            }
            Err(status) => {
                self.error = status;
                FormResult::Error
            }
        }
    }

    fn form_mkcol(&mut self, buf: &mut NetBuffer) -> FormResult {
        match self.ext.mkcol(&self.req) {
            Ok(()) => {
                let mut answer = HttpAnswer::new(
                    buf,
                    HTTP_CREATED_STATUS,
                    CONTENT_TYPE_XML,
                    self.req.keep_alive,
                );
                answer.set_content_length();
                self.keep_alive_state()
            }
            Err(status) => {
                self.error = status;
                FormResult::Error
            }
        }
    }

    fn form_delete(&mut self, buf: &mut NetBuffer) -> FormResult {
        match self.ext.delete(&self.req) {
            Ok(()) => {
                let mut answer = HttpAnswer::new(
                    buf,
                    HTTP_NO_CONTENT_STATUS,
                    CONTENT_TYPE_XML,
                    self.req.keep_alive,
                );
                answer.set_content_length();
                self.keep_alive_state()
            }
            Err(status) => {
                self.error = status;
                FormResult::Error
            }
        }
    }
}

impl<E: DavExtension> HttpHandler for WebDavHandler<E> {
    fn parse_uri(
        &mut self,
        method: HttpMethod,
        version: HttpVersion,
        host: &str,
        file_name: &str,
        _query: &str,
    ) -> bool {
        if version != HttpVersion::V1_1 {
            error!("WebDAV works over HTTP/1.1 only");
            self.error = DavStatus::VersionNotSupported;
            return false;
        }
        self.req.keep_alive = true;

        // POST carries a body exactly like PUT does
        self.req.method = if method == HttpMethod::Post {
            HttpMethod::Put
        } else {
            method
        };

        if self.req.method == HttpMethod::Unknown {
            self.error = DavStatus::MethodNotAllowed;
            return false;
        }

        if host.is_empty() {
            self.req.host.clear();
        } else {
            self.req.host = host.to_string();
        }
        self.req.file_name = file_name.to_string();

        true
    }

    fn parse_header(&mut self, name: &[u8], value: &[u8]) -> bool {
        if let Some(content_length) = http::parse_content_length(name, value) {
            self.req.content_length = content_length;
            self.has_content_length = true;
        } else if let Some(host) = http::parse_host(name, value) {
            self.req.host = host;
        } else if self.parse_overwrite(name, value) {
        } else if let Some(keep_alive) = http::parse_keep_alive(name, value) {
            self.req.keep_alive = keep_alive;
        }
        true
    }

    fn parse_post(
        &mut self,
        body_start: usize,
        buf: &mut NetBuffer,
        ctx: &mut Context<'_>,
    ) -> PostState {
        if self.req.method == HttpMethod::Put {
            if !self.has_content_length {
                self.error = DavStatus::LengthRequired;
                return PostState::Error;
            }

            let (max_in_memory, tmp_path) = match ctx.scratch_mut::<HttpScratch>() {
                Some(scratch) => (
                    scratch.config.max_post_in_memory,
                    scratch.config.tmp_path.clone(),
                ),
                None => (DEFAULT_POST_IN_MEMORY_SIZE, std::path::PathBuf::from("/tmp")),
            };

            return self.save_partial_put(body_start, buf, max_in_memory, &tmp_path);
        }

        if body_start + self.req.content_length <= buf.len() {
            if self.req.method == HttpMethod::Propfind && self.req.content_length > 0 {
                let body =
                    buf.as_slice()[body_start..body_start + self.req.content_length].to_vec();
                if !self.parse_propfind(&body) {
                    return PostState::Error;
                }
            }
            return PostState::Received;
        }

        PostState::NeedMore
    }

    fn form_result(&mut self, buf: &mut NetBuffer, _ctx: &mut Context<'_>) -> FormResult {
        match self.req.method {
            HttpMethod::Get => match self.ext.get(&self.req, buf) {
                Ok(result) => result,
                Err(status) => {
                    self.error = status;
                    FormResult::Error
                }
            },
            HttpMethod::Head => match self.ext.head(&self.req, buf) {
                Ok(result) => result,
                Err(status) => {
                    self.error = status;
                    FormResult::Error
                }
            },
            HttpMethod::Put => self.form_put(buf),
            HttpMethod::Options => self.form_options(buf),
            HttpMethod::Delete => self.form_delete(buf),
            HttpMethod::Propfind => self.form_propfind(buf),
            HttpMethod::Mkcol => self.form_mkcol(buf),
            _ => FormResult::Error,
        }
    }

    fn form_error(&mut self, buf: &mut NetBuffer) -> Option<FormResult> {
        let mut answer = HttpAnswer::new(
            buf,
            self.error.status_line(),
            CONTENT_TYPE_XML,
            self.req.keep_alive,
        );
        answer.set_content_length();
        Some(self.keep_alive_state())
    }

    fn reset(&mut self) -> bool {
        if !self.req.keep_alive {
            return false;
        }

        self.req.reset();
        self.error = DavStatus::BadRequest;
        self.want_method_set = false;
        self.split = false;
        self.content_left = 0;
        self.has_content_length = false;
        true
    }
}
