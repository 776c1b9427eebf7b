//! Request bodies.
//!
//! A [`Body`] is either a buffer that is already complete or a stream that
//! the connection task feeds while the handler runs. The listener only ever
//! holds a few chunks in flight: when nobody reads, the connection stops
//! reading from the socket.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use super::chunked::ChunkedError;

/// Why a streamed body could not be read to the end.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("connection closed before the request body was complete")]
    Truncated,

    #[error("malformed chunked body: {0}")]
    Chunked(#[from] ChunkedError),

    #[error("I/O error while reading the request body: {0}")]
    Io(#[from] std::io::Error),

    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

type Chunk = Result<Bytes, BodyError>;

/// Sending half handed to the connection task.
pub(crate) type BodySender = mpsc::Sender<Chunk>;

#[derive(Debug)]
enum Kind {
    Full(Bytes),
    Streaming(mpsc::Receiver<Chunk>),
}

/// The body of an inbound request.
///
/// Implements [`Stream`], yielding the payload in the pieces it arrived in.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::Body;
///
/// let body = Body::from("hello");
/// assert_eq!(body.as_bytes().map(|b| &b[..]), Some(&b"hello"[..]));
/// assert!(!body.is_streaming());
/// ```
#[derive(Debug)]
pub struct Body {
    kind: Kind,
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl Body {
    pub fn empty() -> Self {
        Self {
            kind: Kind::Full(Bytes::new()),
        }
    }

    /// Creates a streaming body and the sender that feeds it. At most
    /// `capacity` chunks are buffered between the two.
    pub(crate) fn channel(capacity: usize) -> (BodySender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            tx,
            Self {
                kind: Kind::Streaming(rx),
            },
        )
    }

    /// The complete payload, for bodies that were built from a buffer.
    /// Streaming bodies return `None`.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            Kind::Full(bytes) => Some(bytes),
            Kind::Streaming(_) => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.kind, Kind::Streaming(_))
    }

    /// Reads the whole body into memory.
    ///
    /// # Errors
    ///
    /// Fails with [`BodyError::TooLarge`] once more than `limit` bytes have
    /// arrived, or with whatever error ended the stream.
    pub async fn collect(self, limit: usize) -> Result<Bytes, BodyError> {
        let mut rx = match self.kind {
            Kind::Full(bytes) if bytes.len() > limit => return Err(BodyError::TooLarge { limit }),
            Kind::Full(bytes) => return Ok(bytes),
            Kind::Streaming(rx) => rx,
        };

        let mut out = BytesMut::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if out.len() + chunk.len() > limit {
                return Err(BodyError::TooLarge { limit });
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }
}

impl Stream for Body {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().kind {
            Kind::Full(bytes) if bytes.is_empty() => Poll::Ready(None),
            Kind::Full(bytes) => Poll::Ready(Some(Ok(std::mem::take(bytes)))),
            Kind::Streaming(rx) => rx.poll_recv(cx),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            kind: Kind::Full(bytes),
        }
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}
