//! Allow-all cross-origin resource sharing.
//!
//! When enabled, pages on any origin may call through the proxy with any
//! method and any request headers. Only requests carrying an `Origin` header
//! take part. Preflights are answered here and never reach the origin or the
//! cache; every other cross-origin response gets
//! `Access-Control-Allow-Origin: *` on its way out, which is never stored.

use crate::http::{Method, Request, Response, StatusCode};

pub const ALLOW_ORIGIN: &str = "Access-Control-Allow-Origin";
pub const ALLOW_METHODS: &str = "Access-Control-Allow-Methods";
pub const ALLOW_HEADERS: &str = "Access-Control-Allow-Headers";

const REQUEST_METHOD: &str = "Access-Control-Request-Method";
const REQUEST_HEADERS: &str = "Access-Control-Request-Headers";

pub fn is_cross_origin(request: &Request) -> bool {
    request.headers().get("origin").is_some()
}

/// `OPTIONS` with `Origin` and `Access-Control-Request-Method`.
pub fn is_preflight(request: &Request) -> bool {
    *request.method() == Method::Options
        && is_cross_origin(request)
        && request.headers().get(REQUEST_METHOD).is_some()
}

/// The local answer to a preflight: `204`, any origin, and the method and
/// headers the browser asked about.
pub fn preflight(request: &Request) -> Response {
    let mut response = Response::new(StatusCode::NO_CONTENT).header(ALLOW_ORIGIN, "*");
    if let Some(method) = request.headers().get(REQUEST_METHOD) {
        response = response.header(ALLOW_METHODS, method);
    }
    if let Some(headers) = request.headers().get(REQUEST_HEADERS) {
        response = response.header(ALLOW_HEADERS, headers);
    }
    response
}

/// Marks a response to a cross-origin request as readable by any origin.
pub fn allow_any_origin(response: &mut Response) {
    response.set_header(ALLOW_ORIGIN, "*");
}
