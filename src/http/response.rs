//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! serializing them to a byte buffer for transmission over TCP.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// Header fields that describe message framing on a single connection.
///
/// The serializer owns these: values carried on a [`Response`] (for example
/// copied from an origin response) are never written verbatim. The one
/// exception is a declared `Content-Length` on a response that carries no
/// body by definition (HEAD, `304`), which is relayed as the length of the
/// representation.
const FRAMING_HEADERS: [&str; 4] = ["content-length", "transfer-encoding", "connection", "keep-alive"];

/// Returns `true` if `name` is a framing header the serializer writes itself.
pub fn is_framing_header(name: &str) -> bool {
    FRAMING_HEADERS
        .iter()
        .any(|framing| framing.eq_ignore_ascii_case(name))
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// Creates a `text/plain` response, the shape used for every error the
    /// proxy generates itself.
    pub fn plain_text(status: StatusCode, text: impl Into<String>) -> Self {
        Self::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(text)
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the whole header map.
    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a single-valued header in place, replacing any previous values.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes. `Bytes` bodies are shared, not copied.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the header map of this response.
    pub fn header_map(&self) -> &Headers {
        &self.headers
    }

    /// Returns the body of this response.
    pub fn content(&self) -> &Bytes {
        &self.body
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Framing headers carried on the response are dropped and replaced by:
    /// - `Connection: keep-alive` or `Connection: close`;
    /// - `Content-Length`, always the last header before the blank line.
    ///
    /// `Content-Length` is the body length, except that `1xx` and `204`
    /// responses get none (RFC 9110 §8.6) and a `304` keeps the one it
    /// declares, if any. Those three never carry a body.
    pub fn into_bytes(self) -> BytesMut {
        self.encode(false)
    }

    /// Serializes the response to a `HEAD` request: the head that a `GET`
    /// would produce and no body. A declared `Content-Length` is relayed;
    /// otherwise the length of the body is announced.
    pub fn into_head_bytes(self) -> BytesMut {
        self.encode(true)
    }

    fn encode(self, head: bool) -> BytesMut {
        let bodiless_status = self.status.is_informational() || self.status == StatusCode::NO_CONTENT;
        let (content_length, send_body) = if bodiless_status {
            (None, false)
        } else if head || self.status == StatusCode::NOT_MODIFIED {
            let announced = (head && !self.body.is_empty()).then(|| self.body.len().to_string());
            (self.declared_length().or(announced), false)
        } else {
            (Some(self.body.len().to_string()), true)
        };

        let estimated_size = 128 + self.headers.len() * 64 + if send_body { self.body.len() } else { 0 };
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line. Unregistered codes get an empty reason phrase, which
        // RFC 9112 §4 allows.
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason().unwrap_or("")
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            if is_framing_header(name) {
                continue;
            }
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        buf.put(format!("Connection: {connection}\r\n").as_bytes());
        if let Some(length) = content_length {
            buf.put(format!("Content-Length: {length}\r\n").as_bytes());
        }
        buf.put(&b"\r\n"[..]);

        if send_body && !self.body.is_empty() {
            buf.put(self.body);
        }

        buf
    }

    /// A well-formed `Content-Length` carried on the response.
    fn declared_length(&self) -> Option<String> {
        self.headers
            .get("content-length")
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
            .map(str::to_owned)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::OK).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn no_default_content_type() {
        let r = Response::new(StatusCode::OK).body_bytes(vec![1u8, 2, 3]);
        let s = String::from_utf8_lossy(&r.into_bytes()).into_owned();
        assert!(!s.to_ascii_lowercase().contains("content-type"));
    }

    #[test]
    fn repeated_headers_are_all_written() {
        let r = Response::new(StatusCode::OK)
            .header("Set-Cookie", "a=1")
            .header("Set-Cookie", "b=2");
        let s = to_string(r.into_bytes());
        assert!(s.contains("Set-Cookie: a=1\r\nSet-Cookie: b=2\r\n"));
    }

    #[test]
    fn framing_headers_are_recomputed() {
        let r = Response::new(StatusCode::OK)
            .header("content-length", "999")
            .header("Transfer-Encoding", "chunked")
            .header("Connection", "upgrade")
            .body("abc");
        let s = to_string(r.into_bytes());
        assert!(!s.contains("999"));
        assert!(!s.contains("chunked"));
        assert!(!s.contains("upgrade"));
        assert!(s.contains("Content-Length: 3\r\n"));
        assert!(s.contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn connection_close() {
        let r = Response::new(StatusCode::OK).keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn unregistered_status_has_empty_reason() {
        let r = Response::new(StatusCode::from_u16(599).unwrap());
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 599 \r\n"));
    }

    #[test]
    fn head_relays_the_declared_length() {
        let r = Response::new(StatusCode::OK)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", "12345");
        let s = to_string(r.into_head_bytes());
        assert!(s.contains("Content-Length: 12345\r\n"));
        assert_eq!(s.matches("Content-Length").count(), 1);
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn head_announces_local_body_without_sending_it() {
        let s = to_string(Response::new(StatusCode::OK).body("hello").into_head_bytes());
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(!s.contains("hello"));
    }

    #[test]
    fn not_modified_keeps_its_length_and_sends_no_body() {
        let r = Response::new(StatusCode::NOT_MODIFIED).header("content-length", "10");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 304 Not Modified\r\n"));
        assert!(s.contains("Content-Length: 10\r\n"));
        assert!(s.ends_with("\r\n\r\n"));

        let bare = to_string(Response::new(StatusCode::NOT_MODIFIED).into_bytes());
        assert!(!bare.contains("Content-Length"));
    }

    #[test]
    fn no_content_and_informational_have_no_length() {
        for code in [204, 101] {
            let r = Response::new(StatusCode::from_u16(code).unwrap()).header("Content-Length", "0");
            let s = to_string(r.into_bytes());
            assert!(!s.contains("Content-Length"), "{s}");
            assert!(s.ends_with("\r\n\r\n"));
        }
    }

    #[test]
    fn set_header_replaces() {
        let mut r = Response::new(StatusCode::OK).header("X-Cache", "HIT");
        r.set_header("X-Cache", "MISS");
        let values: Vec<_> = r.header_map().get_all("x-cache").collect();
        assert_eq!(values, vec!["MISS"]);
    }
}
