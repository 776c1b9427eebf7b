//! Async TCP listener using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler function.
//! Supports persistent connections (keep-alive), `Content-Length` and chunked
//! request bodies, and graceful shutdown of the accept loop.
//!
//! Request bodies are never buffered whole: the handler receives a streaming
//! [`Body`] that the connection task fills from the socket while the handler
//! runs, a few chunks at a time.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    Body, BodyError, Method, StatusCode,
    body::BodySender,
    chunked::{ChunkedDecoder, Decoded},
    request::{BodyFraming, Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request head (request line and header fields) we will buffer.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Body chunks in flight between the connection task and the handler.
const BODY_CHANNEL_CAPACITY: usize = 8;

/// The HTTP/1.1 listener the proxy runs on.
///
/// Binds to a TCP address and dispatches incoming requests to a handler
/// function, one Tokio task per connection.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_cache::server::Server;
/// use rttp_cache::http::{Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(|_req| async {
///         Response::new(StatusCode::OK).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until_shutdown(handler, std::future::pending())
            .await
    }

    /// Accepts connections and dispatches requests to `handler` until
    /// `shutdown` resolves.
    ///
    /// The handler receives a [`Request`] and must return a [`Future`] that
    /// resolves to a [`Response`]. It is wrapped in an [`Arc`] and shared
    /// across all spawned Tokio tasks, so it must be `Send + Sync + 'static`.
    ///
    /// Once `shutdown` resolves the listener is closed; connections already
    /// accepted keep running on their own tasks until their peers disconnect.
    pub async fn run_until_shutdown<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "listening");

        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutdown signalled, no longer accepting");
                    return Ok(());
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

// Outcome of trying to parse one request head from the front of the buffer.
enum Head {
    Ready {
        request: Request,
        framing: BodyFraming,
        consumed: usize,
    },
    NeedMore,
    Reject(Response),
}

fn parse_head(buf: &[u8]) -> Head {
    let (request, consumed) = match Request::parse(buf) {
        Ok(pair) => pair,
        Err(RequestError::Incomplete) if buf.len() > MAX_HEAD_SIZE => {
            return Head::Reject(head_too_large());
        }
        Err(RequestError::Incomplete) => return Head::NeedMore,
        Err(e) => return Head::Reject(bad_request(&e)),
    };

    match request.framing() {
        Ok(framing) => Head::Ready {
            request,
            framing,
            consumed,
        },
        Err(e) => Head::Reject(bad_request(&e)),
    }
}

fn bad_request(error: &dyn std::error::Error) -> Response {
    Response::plain_text(StatusCode::BAD_REQUEST, format!("Bad Request: {error}")).keep_alive(false)
}

fn head_too_large() -> Response {
    Response::plain_text(
        StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
        "Request header fields too large",
    )
    .keep_alive(false)
}

/// How feeding a request body left the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pumped {
    /// The whole body was read off the socket; the next request starts at
    /// the front of the buffer.
    Complete,
    /// The handler stopped reading, or the body was malformed or cut short.
    /// The connection cannot carry another request.
    Abandoned,
}

/// Reads one request body off the connection and feeds it to `tx`.
///
/// Blocks on the channel when the handler falls behind, so at most
/// [`BODY_CHANNEL_CAPACITY`] chunks are held in memory. Bytes after the end
/// of the body stay in `buf`.
async fn pump_body<R>(reader: &mut R, buf: &mut BytesMut, framing: BodyFraming, tx: BodySender) -> Pumped
where
    R: AsyncRead + Unpin,
{
    let fed = match framing {
        BodyFraming::Empty => return Pumped::Complete,
        BodyFraming::Length(len) => pump_length(reader, buf, len, &tx).await,
        BodyFraming::Chunked => pump_chunked(reader, buf, &tx).await,
    };

    match fed {
        Ok(pumped) => pumped,
        Err(e) => {
            debug!(error = %e, "request body ended early");
            // The handler may have stopped listening already.
            let _ = tx.send(Err(e)).await;
            Pumped::Abandoned
        }
    }
}

async fn pump_length<R>(reader: &mut R, buf: &mut BytesMut, len: usize, tx: &BodySender) -> Result<Pumped, BodyError>
where
    R: AsyncRead + Unpin,
{
    let mut remaining = len;
    while remaining > 0 {
        if buf.is_empty() {
            fill(reader, buf).await?;
        }
        let take = remaining.min(buf.len());
        remaining -= take;
        if tx.send(Ok(buf.split_to(take).freeze())).await.is_err() {
            return Ok(Pumped::Abandoned);
        }
    }
    Ok(Pumped::Complete)
}

async fn pump_chunked<R>(reader: &mut R, buf: &mut BytesMut, tx: &BodySender) -> Result<Pumped, BodyError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = ChunkedDecoder::new();
    loop {
        match decoder.decode(buf)? {
            Decoded::Data(data) => {
                if tx.send(Ok(data)).await.is_err() {
                    return Ok(Pumped::Abandoned);
                }
            }
            Decoded::NeedMore => fill(reader, buf).await?,
            Decoded::Done => return Ok(Pumped::Complete),
        }
    }
}

/// Reads more of the body; end of stream here means the body was cut short.
async fn fill<R>(reader: &mut R, buf: &mut BytesMut) -> Result<(), BodyError>
where
    R: AsyncRead + Unpin,
{
    buf.reserve(INITIAL_BUF_SIZE);
    if reader.read_buf(buf).await? == 0 {
        return Err(BodyError::Truncated);
    }
    Ok(())
}

/// Runs the handler while the body is being fed to it.
///
/// The response may be ready before the body has been read in full (the
/// origin answered early, or the handler ignores the body); feeding stops
/// there and the body counts as abandoned.
async fn respond_while_pumping<F, P>(handling: F, pump: P) -> (Response, Pumped)
where
    F: Future<Output = Response>,
    P: Future<Output = Pumped>,
{
    tokio::pin!(handling);
    tokio::pin!(pump);

    let mut pumped = None;
    let response = loop {
        tokio::select! {
            response = &mut handling => break response,
            outcome = &mut pump, if pumped.is_none() => pumped = Some(outcome),
        }
    };
    (response, pumped.unwrap_or(Pumped::Abandoned))
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, serving every
/// request in turn, until the peer closes the connection, signals
/// `Connection: close`, or a body is left unread.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let (mut reader, mut writer) = stream.split();
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let (request, framing, consumed) = match parse_head(&buf) {
            Head::Ready {
                request,
                framing,
                consumed,
            } => (request, framing, consumed),
            Head::NeedMore => {
                if reader.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                continue;
            }
            Head::Reject(response) => {
                warn!(peer = %peer_addr, status = %response.status(), "rejecting malformed request");
                writer.write_all(&response.into_bytes()).await?;
                break;
            }
        };
        buf.advance(consumed);

        let keep_alive = request.is_keep_alive();
        let head = *request.method() == Method::Head;
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            ?framing,
            "dispatching request"
        );
        let request = request.with_remote_addr(peer_addr);

        let (response, pumped) = if framing == BodyFraming::Empty {
            (handler(request).await, Pumped::Complete)
        } else {
            let (tx, body) = Body::channel(BODY_CHANNEL_CAPACITY);
            let handling = handler(request.with_body(body));
            respond_while_pumping(handling, pump_body(&mut reader, &mut buf, framing, tx)).await
        };

        let keep_alive = keep_alive && pumped == Pumped::Complete;
        let response = response.keep_alive(keep_alive);
        let bytes = if head {
            response.into_head_bytes()
        } else {
            response.into_bytes()
        };
        writer.write_all(&bytes).await?;
        writer.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, ?pumped, "closing connection");
            break;
        }
    }

    Ok(())
}
