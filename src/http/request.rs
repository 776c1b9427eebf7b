//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::net::SocketAddr;

use thiserror::Error;
use tracing::debug;

use super::{Body, Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete: more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    #[error("unsupported Transfer-Encoding: {value:?}")]
    UnsupportedTransferEncoding { value: String },

    #[error("request carries both Content-Length and Transfer-Encoding")]
    AmbiguousFraming,
}

/// How the body of a request is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body follows the head.
    Empty,
    /// Exactly this many bytes follow the head.
    Length(usize),
    /// A `Transfer-Encoding: chunked` body follows the head.
    Chunked,
}

/// A parsed HTTP/1.1 request.
///
/// Created by [`Request::parse`] from the request head; the server attaches
/// the body with [`Request::with_body`] (a stream it feeds while the handler
/// runs) and records the peer with [`Request::with_remote_addr`].
///
/// # Examples
///
/// ```
/// use rttp_cache::http::request::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_string(), Some("name=world"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Body,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parses the head of an HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` (with an empty body) and the byte offset
    /// at which the body begins in `buf`, i.e. immediately after the
    /// `\r\n\r\n` header terminator.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the request head.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: a required field (method, path, version) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
            .unwrap_or_else(|never| match never {});

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (raw_path.to_owned(), None),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            match std::str::from_utf8(header.value) {
                Ok(value) => header_map.insert(header.name, value),
                Err(_) => debug!(header = header.name, "dropping header with a non-UTF-8 value"),
            }
        }

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body: Body::empty(),
                remote_addr: None,
            },
            body_offset,
        ))
    }

    /// Attaches the de-framed body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Records the network address of the peer that sent this request.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    ///
    /// `/a?` yields `Some("")`, `/a` yields `None`.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Takes the body out, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Returns the peer address, when the request came in over a socket.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return false;
        }
        self.version == 1 || self.headers.has_token("connection", "keep-alive")
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present and valid.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    /// Determines how the body following the head is delimited.
    ///
    /// # Errors
    ///
    /// Rejects requests whose framing is ambiguous or unreadable: both
    /// `Content-Length` and `Transfer-Encoding`, a non-numeric length, or a
    /// transfer coding that does not end in `chunked`.
    pub fn framing(&self) -> Result<BodyFraming, RequestError> {
        let has_length = self.headers.contains("content-length");

        if let Some(te) = self.headers.get("transfer-encoding") {
            if has_length {
                return Err(RequestError::AmbiguousFraming);
            }
            let last = te.rsplit(',').next().unwrap_or("").trim();
            if !last.eq_ignore_ascii_case("chunked") {
                return Err(RequestError::UnsupportedTransferEncoding {
                    value: te.to_owned(),
                });
            }
            return Ok(BodyFraming::Chunked);
        }

        if !has_length {
            return Ok(BodyFraming::Empty);
        }

        match self.content_length() {
            Some(0) => Ok(BodyFraming::Empty),
            Some(n) => Ok(BodyFraming::Length(n)),
            None => Err(RequestError::InvalidContentLength {
                value: self.headers.get("content-length").unwrap_or("").to_owned(),
            }),
        }
    }

    /// Returns `true` if the request declares a body: a non-zero
    /// `Content-Length` or chunked transfer coding.
    pub fn declares_body(&self) -> bool {
        matches!(
            self.framing(),
            Ok(BodyFraming::Length(_) | BodyFraming::Chunked)
        )
    }
}
