//! The caching request pipeline.
//!
//! Every inbound request walks the same path:
//!
//! ```text
//! Start ─► KeyBuilt ─┬─► Hit ─────────────────────────────────► Served (X-Cache: HIT)
//!                    └─► Miss ─► Forwarded ─┬─► Cacheable ─────► Served (X-Cache: MISS, stored)
//!                              │            └─► NotCacheable ──► Served (X-Cache: MISS)
//!                              └─► Failed ─────────────────────► 502 / 500
//! ```
//!
//! The store is written only once a complete origin response is in hand, so
//! a request that is cancelled mid-forward leaves no trace in the cache.
//!
//! Concurrent misses for the same key are not coalesced: each one reaches
//! the origin and each eligible response is upserted, last writer wins.
//!
//! With [`cors`] enabled, preflights short-circuit before the key is built.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, CacheKey, CachePolicy, CacheStore, SuccessOnly};
use crate::config::ProxyConfig;
use crate::http::{Request, Response, StatusCode};

pub mod admin;
pub mod cors;
mod error;
pub mod forward;

pub use error::ForwardError;
pub use forward::{HttpForwarder, Upstream, UpstreamResponse};

/// Response header reporting whether the cache answered.
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

/// Body of the `502` sent when the origin cannot be reached.
pub const BAD_GATEWAY_MESSAGE: &str = "Error connecting to the origin server.";

/// Body of the `500` sent on any other failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal server error occurred.";

/// Whether a response came from the cache or from the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// Terminal state of one pass through the pipeline.
#[derive(Debug)]
pub enum Outcome {
    /// The store had an entry for the key.
    Hit(Arc<CacheEntry>),
    /// Miss; the origin answered and the response was stored.
    Stored(UpstreamResponse),
    /// Miss; the origin answered but the policy declined to store it.
    NotCacheable(UpstreamResponse),
    /// Miss; the origin could not be used.
    Failed(ForwardError),
}

impl Outcome {
    /// The cache indicator this outcome is served with, if any.
    pub fn cache_status(&self) -> Option<CacheStatus> {
        match self {
            Self::Hit(_) => Some(CacheStatus::Hit),
            Self::Stored(_) | Self::NotCacheable(_) => Some(CacheStatus::Miss),
            Self::Failed(_) => None,
        }
    }

    /// Renders the single response written back to the caller.
    pub fn into_response(self) -> Response {
        let cache_status = self.cache_status();
        let mut response = match self {
            Self::Hit(entry) => entry.to_response(),
            Self::Stored(fresh) | Self::NotCacheable(fresh) => Response::new(fresh.status)
                .headers(fresh.headers)
                .body_bytes(fresh.body),
            Self::Failed(ForwardError::Upstream { .. }) => {
                Response::plain_text(StatusCode::BAD_GATEWAY, BAD_GATEWAY_MESSAGE)
            }
            Self::Failed(ForwardError::Internal { .. }) => {
                Response::plain_text(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
            }
        };
        if let Some(status) = cache_status {
            response.set_header(CACHE_STATUS_HEADER, status.as_str());
        }
        response
    }
}

/// Running counters, updated without locks.
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stored: AtomicU64,
    upstream_errors: AtomicU64,
    internal_errors: AtomicU64,
}

/// Point-in-time view of the proxy's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stored: u64,
    pub upstream_errors: u64,
    pub internal_errors: u64,
}

/// A read-through caching reverse proxy for a single origin.
///
/// Cheap to share: wrap it in an [`Arc`] and call [`handle`](Self::handle)
/// from every connection task.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::config::ProxyConfig;
/// use rttp_cache::proxy::CachingProxy;
/// use rttp_cache::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ProxyConfig::new(8080, "http://localhost:3000", None)?;
///     let proxy = Arc::new(CachingProxy::from_config(&config)?);
///     let server = Server::bind(config.listen_addr()).await?;
///     server
///         .run(move |req| {
///             let proxy = Arc::clone(&proxy);
///             async move { proxy.handle(req).await }
///         })
///         .await?;
///     Ok(())
/// }
/// ```
pub struct CachingProxy<U = HttpForwarder> {
    store: Arc<CacheStore>,
    upstream: U,
    policy: Box<dyn CachePolicy>,
    admin_path: Option<String>,
    cors: bool,
    counters: Counters,
}

impl CachingProxy<HttpForwarder> {
    /// Builds a proxy with a fresh, empty store from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::Internal`] if the HTTP client cannot be created.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ForwardError> {
        let upstream = HttpForwarder::new(config.origin.clone())?;
        let proxy = Self::new(upstream, Arc::new(CacheStore::new())).with_cors(config.cors);
        Ok(match &config.admin_path {
            Some(path) => proxy.with_admin_path(path.clone()),
            None => proxy,
        })
    }
}

impl<U: Upstream> CachingProxy<U> {
    /// Creates a proxy over `upstream` backed by `store`, caching 2xx responses.
    pub fn new(upstream: U, store: Arc<CacheStore>) -> Self {
        Self {
            store,
            upstream,
            policy: Box::new(SuccessOnly),
            admin_path: None,
            cors: false,
            counters: Counters::default(),
        }
    }

    /// Replaces the admission policy.
    #[must_use]
    pub fn with_policy(mut self, policy: impl CachePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Enables the cache control endpoint at `path`. See [`admin`].
    #[must_use]
    pub fn with_admin_path(mut self, path: impl Into<String>) -> Self {
        self.admin_path = Some(path.into());
        self
    }

    /// Turns allow-all CORS on or off. See [`cors`].
    #[must_use]
    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.cors = enabled;
        self
    }

    /// The store this proxy reads and writes.
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Current counters and store size.
    pub fn stats(&self) -> ProxyStats {
        ProxyStats {
            entries: self.store.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stored: self.counters.stored.load(Ordering::Relaxed),
            upstream_errors: self.counters.upstream_errors.load(Ordering::Relaxed),
            internal_errors: self.counters.internal_errors.load(Ordering::Relaxed),
        }
    }

    /// Entry point for the listener: answers preflights and admin requests,
    /// proxies the rest, and logs one line per request.
    pub async fn handle(&self, request: Request) -> Response {
        let started = Instant::now();
        let method = request.method().clone();
        let path = request.path().to_owned();
        let cross_origin = self.cors && cors::is_cross_origin(&request);

        if cross_origin && cors::is_preflight(&request) {
            let response = cors::preflight(&request);
            info!(%method, %path, status = %response.status(), "preflight answered");
            return response;
        }

        let mut response = if self.admin_path.as_deref() == Some(request.path()) {
            let response = admin::handle(self, &request);
            info!(%method, %path, status = %response.status(), "admin request");
            response
        } else {
            let outcome = self.resolve(request).await;
            let cache = outcome.cache_status().map_or("-", CacheStatus::as_str);
            let response = outcome.into_response();
            info!(
                %method,
                %path,
                status = response.status().as_u16(),
                cache,
                elapsed = ?started.elapsed(),
                "request served"
            );
            response
        };

        if cross_origin {
            cors::allow_any_origin(&mut response);
        }
        response
    }

    /// Runs the cache-aside state machine for one request.
    ///
    /// The request is consumed on a miss: its body is streamed to the origin.
    pub async fn resolve(&self, request: Request) -> Outcome {
        let key = CacheKey::for_request(&request);

        if let Some(entry) = self.store.lookup(&key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(%key, "cache hit");
            return Outcome::Hit(entry);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(%key, "cache miss, forwarding");

        let fresh = match self.upstream.forward(request).await {
            Ok(fresh) => fresh,
            Err(e) => {
                match &e {
                    ForwardError::Upstream { .. } => {
                        self.counters.upstream_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(%key, error = %e, "origin unreachable");
                    }
                    ForwardError::Internal { .. } => {
                        self.counters.internal_errors.fetch_add(1, Ordering::Relaxed);
                        error!(%key, error = %e, "forwarding failed");
                    }
                }
                return Outcome::Failed(e);
            }
        };

        if !self.policy.should_cache(fresh.status) {
            debug!(%key, status = %fresh.status, "not cacheable");
            return Outcome::NotCacheable(fresh);
        }

        let entry = CacheEntry::new(fresh.status, fresh.headers.clone(), fresh.body.clone());
        let replaced = self.store.upsert(key.clone(), entry);
        self.counters.stored.fetch_add(1, Ordering::Relaxed);
        debug!(%key, bytes = fresh.body.len(), replaced, "stored response");

        Outcome::Stored(fresh)
    }
}
