//! Immutable snapshot of a cached origin response.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::http::{Headers, Response, StatusCode};

/// A cached response: status, every header field the origin sent, and the body.
///
/// Entries are never mutated after construction; refreshing a key replaces
/// its entry wholesale. The store hands out `Arc<CacheEntry>`, so a reader
/// holding an entry keeps seeing exactly that snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Snapshots a response, stamping it with the current time.
    pub fn new(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// When the entry was created. Informational only; nothing expires on it.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Builds the response to replay this entry. The body is shared, not copied.
    pub fn to_response(&self) -> Response {
        Response::new(self.status)
            .headers(self.headers.clone())
            .body_bytes(self.body.clone())
    }
}
