//! # rttp-cache
//!
//! A read-through caching reverse proxy on a from-scratch async HTTP/1.1 core.
//!
//! Every request is keyed by its method, path and query string. On a hit the
//! stored response is replayed; on a miss the request is forwarded to a single
//! origin, the response is relayed, and 2xx responses are kept for next time.
//! Entries never expire; the whole store can be cleared at once.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rttp_cache::{CachingProxy, ProxyConfig, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProxyConfig::new(8080, "http://localhost:3000", None)?;
//!     let proxy = Arc::new(CachingProxy::from_config(&config)?);
//!     let server = Server::bind(config.listen_addr()).await?;
//!     server.run(move |req| {
//!         let proxy = Arc::clone(&proxy);
//!         async move { proxy.handle(req).await }
//!     }).await?;
//!     Ok(())
//! }
//! ```

// ── Protocol and transport ────────────────────────────────────────────────────
pub mod http;
pub mod server;

// ── Caching proxy ─────────────────────────────────────────────────────────────
pub mod cache;
pub mod config;
pub mod proxy;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheEntry, CacheKey, CacheStore};
pub use config::{ConfigError, Origin, ProxyConfig};
pub use http::{Body, Headers, Method, Request, Response, StatusCode};
pub use proxy::{CacheStatus, CachingProxy, ForwardError, HttpForwarder, ProxyStats, Upstream};
pub use server::{Server, ServerError};
