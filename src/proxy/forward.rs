//! Upstream forwarding: translating inbound requests into origin requests.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use super::ForwardError;
use crate::config::Origin;
use crate::http::{
    Headers, Request, StatusCode,
    request::BodyFraming,
    response::is_framing_header,
};

/// Header carrying the caller's address to the origin.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// A complete origin response, fully read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Bytes,
}

/// Boxed future returned by [`Upstream::forward`].
pub type ForwardFuture<'a> =
    Pin<Box<dyn Future<Output = Result<UpstreamResponse, ForwardError>> + Send + 'a>>;

/// Something that can answer a request on behalf of the origin.
///
/// [`HttpForwarder`] is the real implementation; the seam exists so the
/// pipeline can be driven by anything that produces an [`UpstreamResponse`].
///
/// # Contract
///
/// - A single attempt per call; no retries.
/// - The returned future must be `Send` and safe to drop at any `.await`
///   point: dropping it abandons the attempt.
pub trait Upstream: Send + Sync {
    /// Sends `request` to the origin and returns its full response.
    ///
    /// The request is taken by value so its body can be streamed out as it
    /// arrives.
    fn forward<'a>(&'a self, request: Request) -> ForwardFuture<'a>;
}

/// Forwards requests to the origin over HTTP with [`reqwest`].
///
/// - Target: origin base URL + inbound path + query string.
/// - Method: copied.
/// - Headers: copied, except `Host` (the client derives it from the target),
///   connection-framing fields (re-framed by the client) and every
///   `Content-*` field, which describes the body and is re-attached to it
///   when a body is sent. `X-Forwarded-For` carries the caller's IP.
/// - Body: attached only when the inbound request declares one. A body that
///   is still arriving is streamed to the origin chunk by chunk, keeping its
///   declared `Content-Length` when it had one.
/// - Redirects are not followed; the caller gets them as-is.
pub struct HttpForwarder {
    client: reqwest::Client,
    origin: Origin,
}

impl HttpForwarder {
    /// Creates a forwarder for `origin` with a dedicated connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::Internal`] if the HTTP client cannot be
    /// initialised (e.g. the TLS backend fails to load).
    pub fn new(origin: Origin) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| ForwardError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, origin })
    }

    /// Returns the origin this forwarder targets.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Translates an inbound request into the outbound request for the origin.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::Internal`] if the method or target URL is not
    /// something the client can send.
    pub fn build_request(&self, mut request: Request) -> Result<reqwest::Request, ForwardError> {
        let target = self.origin.target(request.path(), request.query_string());
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|e| ForwardError::internal(format!("unsupported method: {e}")))?;

        let mut headers = HeaderMap::with_capacity(request.headers().len() + 1);
        let mut entity = HeaderMap::new();

        for (name, value) in request.headers().iter() {
            if name.eq_ignore_ascii_case("host") || is_framing_header(name) {
                continue;
            }
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) else {
                debug!(header = name, "dropping header the client cannot encode");
                continue;
            };
            if name.as_str().starts_with("content-") {
                entity.append(name, value);
            } else {
                headers.append(name, value);
            }
        }

        if let Some(addr) = request.remote_addr() {
            if let Ok(value) = HeaderValue::from_str(&addr.ip().to_string()) {
                headers.append(FORWARDED_FOR_HEADER, value);
            }
        }

        let mut builder = self.client.request(method, &target).headers(headers);
        if request.declares_body() {
            let length = match request.framing() {
                Ok(BodyFraming::Length(len)) => Some(len),
                _ => None,
            };
            let body = request.take_body();
            let body = match body.as_bytes() {
                Some(bytes) => reqwest::Body::from(bytes.clone()),
                None => {
                    if let Some(len) = length {
                        entity.insert(reqwest::header::CONTENT_LENGTH, HeaderValue::from(len));
                    }
                    reqwest::Body::wrap_stream(body)
                }
            };
            builder = builder.headers(entity).body(body);
        }

        builder
            .build()
            .map_err(|e| ForwardError::from_reqwest(&target, e))
    }

    async fn send(&self, request: Request) -> Result<UpstreamResponse, ForwardError> {
        let outbound = self.build_request(request)?;
        let target = outbound.url().to_string();

        let response = self
            .client
            .execute(outbound)
            .await
            .map_err(|e| ForwardError::from_reqwest(&target, e))?;

        let status = StatusCode::from_u16(response.status().as_u16()).ok_or_else(|| {
            ForwardError::internal(format!("origin returned status {}", response.status()))
        })?;

        // One map for every field the origin sent; repeated names are kept.
        let headers: Headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                let value = match std::str::from_utf8(value.as_bytes()) {
                    Ok(text) => text.to_owned(),
                    Err(_) => {
                        debug!(header = %name, "origin header value is not UTF-8, relaying it lossily");
                        String::from_utf8_lossy(value.as_bytes()).into_owned()
                    }
                };
                (name.as_str().to_owned(), value)
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| ForwardError::from_reqwest(&target, e))?;

        debug!(target = %target, status = %status, bytes = body.len(), "origin responded");

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

impl Upstream for HttpForwarder {
    fn forward<'a>(&'a self, request: Request) -> ForwardFuture<'a> {
        Box::pin(self.send(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Body;

    fn forwarder() -> HttpForwarder {
        HttpForwarder::new(Origin::parse("http://origin.test:9000/base/").unwrap()).unwrap()
    }

    fn inbound(raw: &[u8], body: &'static [u8]) -> Request {
        let (request, _) = Request::parse(raw).unwrap();
        request
            .with_body(Bytes::from_static(body))
            .with_remote_addr("10.1.2.3:5555".parse().unwrap())
    }

    #[test]
    fn target_method_and_forwarded_for() {
        let req = inbound(b"DELETE /items/7?force=1 HTTP/1.1\r\nHost: proxy\r\nAccept: */*\r\n\r\n", b"");
        let out = forwarder().build_request(req).unwrap();

        assert_eq!(out.method(), &reqwest::Method::DELETE);
        assert_eq!(out.url().as_str(), "http://origin.test:9000/base/items/7?force=1");
        assert_eq!(out.headers().get("accept").unwrap(), "*/*");
        assert_eq!(out.headers().get(FORWARDED_FOR_HEADER).unwrap(), "10.1.2.3");
        assert!(out.body().is_none());
    }

    #[test]
    fn host_and_content_headers_are_not_copied_verbatim() {
        let req = inbound(
            b"POST /submit HTTP/1.1\r\nHost: proxy\r\nContent-Type: application/json\r\nContent-Length: 7\r\nX-Trace: t1\r\n\r\n",
            b"{\"a\":1}",
        );
        let out = forwarder().build_request(req).unwrap();

        assert!(out.headers().get("host").is_none());
        assert!(out.headers().get("content-length").is_none());
        assert_eq!(out.headers().get("x-trace").unwrap(), "t1");
        // Content type travels with the body instead.
        assert_eq!(out.headers().get("content-type").unwrap(), "application/json");
        assert_eq!(out.headers().get_all("content-type").iter().count(), 1);
        let body = out.body().and_then(reqwest::Body::as_bytes).unwrap();
        assert_eq!(body, b"{\"a\":1}");
    }

    #[test]
    fn bodyless_request_drops_entity_headers() {
        let req = inbound(
            b"GET / HTTP/1.1\r\nHost: proxy\r\nContent-Type: text/plain\r\nContent-Length: 0\r\n\r\n",
            b"",
        );
        let out = forwarder().build_request(req).unwrap();
        assert!(out.body().is_none());
        assert!(out.headers().get("content-type").is_none());
    }

    #[test]
    fn chunked_request_is_reframed() {
        let req = inbound(
            b"PUT /blob HTTP/1.1\r\nHost: proxy\r\nTransfer-Encoding: chunked\r\nContent-Type: text/plain\r\n\r\n",
            b"hello",
        );
        let out = forwarder().build_request(req).unwrap();
        assert!(out.headers().get("transfer-encoding").is_none());
        assert_eq!(out.headers().get("content-type").unwrap(), "text/plain");
        assert_eq!(out.body().and_then(reqwest::Body::as_bytes).unwrap(), b"hello");
    }

    #[test]
    fn streamed_body_keeps_its_declared_length() {
        let (raw, _) = Request::parse(
            b"POST /upload HTTP/1.1\r\nHost: proxy\r\nContent-Type: application/octet-stream\r\nContent-Length: 9437184\r\n\r\n",
        )
        .unwrap();
        let (_tx, body) = Body::channel(1);
        let out = forwarder().build_request(raw.with_body(body)).unwrap();

        assert_eq!(out.headers().get("content-length").unwrap(), "9437184");
        assert_eq!(out.headers().get("content-type").unwrap(), "application/octet-stream");
        // Not buffered: the client pulls it from the connection as it arrives.
        let body = out.body().unwrap();
        assert!(body.as_bytes().is_none());
    }

    #[test]
    fn streamed_chunked_body_has_no_length() {
        let (raw, _) =
            Request::parse(b"PUT /blob HTTP/1.1\r\nHost: proxy\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap();
        let (_tx, body) = Body::channel(1);
        let out = forwarder().build_request(raw.with_body(body)).unwrap();

        assert!(out.headers().get("content-length").is_none());
        assert!(out.body().is_some_and(|b| b.as_bytes().is_none()));
    }

    #[test]
    fn repeated_request_headers_survive() {
        let req = inbound(
            b"GET / HTTP/1.1\r\nAccept-Language: en\r\nAccept-Language: fr\r\n\r\n",
            b"",
        );
        let out = forwarder().build_request(req).unwrap();
        let values: Vec<_> = out.headers().get_all("accept-language").iter().collect();
        assert_eq!(values, vec!["en", "fr"]);
    }

    #[tokio::test]
    async fn refused_connection_is_an_upstream_error() {
        // Grab a free port, then close it so nothing is listening there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let forwarder =
            HttpForwarder::new(Origin::parse(&format!("http://127.0.0.1:{port}")).unwrap()).unwrap();
        let req = inbound(b"GET /x HTTP/1.1\r\nHost: proxy\r\n\r\n", b"");
        let err = forwarder.forward(req).await.unwrap_err();
        assert!(err.is_upstream(), "unexpected error: {err}");
    }
}
