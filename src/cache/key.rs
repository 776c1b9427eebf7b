//! Cache key derivation.

use std::fmt;

use crate::http::{Method, Request};

/// Identifies a cacheable resource by its request line.
///
/// A key is built from exactly three inputs: method, path and query string.
/// Headers, body and the client address never take part, so two requests
/// that differ only in those share a cache entry.
///
/// The fields are kept apart rather than concatenated, which makes equality a
/// field-by-field comparison: no choice of separator can make two distinct
/// request lines collide. An absent query (`/a`) and an empty one (`/a?`) are
/// different keys.
///
/// # Examples
///
/// ```
/// use rttp_cache::cache::CacheKey;
/// use rttp_cache::http::Method;
///
/// let a = CacheKey::build(&Method::Get, "/items", Some("page=2"));
/// let b = CacheKey::build(&Method::Get, "/items", Some("page=2"));
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "GET /items?page=2");
///
/// assert_ne!(a, CacheKey::build(&Method::Head, "/items", Some("page=2")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    path: String,
    query: Option<String>,
}

impl CacheKey {
    /// Builds the key for a request line.
    pub fn build(method: &Method, path: &str, query: Option<&str>) -> Self {
        Self {
            method: method.clone(),
            path: path.to_owned(),
            query: query.map(str::to_owned),
        }
    }

    /// Builds the key for an inbound request.
    pub fn for_request(request: &Request) -> Self {
        Self::build(request.method(), request.path(), request.query_string())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}
