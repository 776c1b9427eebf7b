//! Cache control endpoint.
//!
//! When the proxy is started with an admin path, requests for exactly that
//! path are answered locally instead of being forwarded:
//!
//! | Method   | Effect                                  | Body                           |
//! |----------|-----------------------------------------|--------------------------------|
//! | `GET`    | none                                    | [`ProxyStats`] as JSON         |
//! | `DELETE` | drops every entry in one atomic step    | [`ClearReport`] as JSON        |
//! | other    | none                                    | `405`, `Allow: GET, DELETE`    |
//!
//! [`clear_remote`] is the client half used by the `clear-cache` subcommand.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::{CachingProxy, ProxyStats, Upstream};
use crate::http::{Method, Request, Response, StatusCode};

const JSON: &str = "application/json";

/// Result of a cache clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    /// Entries that were in the store when it was cleared.
    pub cleared: usize,
}

/// Answers a request addressed to the admin path.
pub(crate) fn handle<U: Upstream>(proxy: &CachingProxy<U>, request: &Request) -> Response {
    match request.method() {
        Method::Get => json(&proxy.stats()),
        Method::Delete => {
            let cleared = proxy.store().clear();
            info!(cleared, "cache cleared");
            json(&ClearReport { cleared })
        }
        _ => Response::plain_text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
            .header("Allow", "GET, DELETE"),
    }
}

fn json<T: Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => Response::new(StatusCode::OK)
            .header("Content-Type", JSON)
            .header("Cache-Control", "no-store")
            .body_bytes(body),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode admin response");
            Response::plain_text(StatusCode::INTERNAL_SERVER_ERROR, super::INTERNAL_ERROR_MESSAGE)
        }
    }
}

/// Errors from [`clear_remote`] and [`stats_remote`].
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("could not reach the proxy at {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("proxy at {url} answered {status}; is the admin path enabled?")]
    Status { url: String, status: u16 },

    #[error("unexpected response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Asks a running proxy at `addr` (`host:port`) to clear its cache.
/// Returns how many entries were dropped.
pub async fn clear_remote(addr: &str, admin_path: &str) -> Result<usize, AdminError> {
    let report: ClearReport = call(reqwest::Method::DELETE, addr, admin_path).await?;
    Ok(report.cleared)
}

/// Fetches the counters of a running proxy.
pub async fn stats_remote(addr: &str, admin_path: &str) -> Result<ProxyStats, AdminError> {
    call(reqwest::Method::GET, addr, admin_path).await
}

async fn call<T: serde::de::DeserializeOwned>(
    method: reqwest::Method,
    addr: &str,
    admin_path: &str,
) -> Result<T, AdminError> {
    let url = format!("http://{addr}{admin_path}");
    let request_failed = |source| AdminError::Request {
        url: url.clone(),
        source,
    };

    let response = reqwest::Client::new()
        .request(method, &url)
        .send()
        .await
        .map_err(request_failed)?;

    let status = response.status();
    if !status.is_success() {
        return Err(AdminError::Status {
            url,
            status: status.as_u16(),
        });
    }

    let body = response.bytes().await.map_err(request_failed)?;
    serde_json::from_slice(&body).map_err(|source| AdminError::Decode { url, source })
}
