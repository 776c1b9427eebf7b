//! Proxy configuration.
//!
//! The binary builds a [`ProxyConfig`] from its command line; library users
//! can build one directly. Validation happens here so the pipeline can treat
//! the origin as a plain, well-formed base URL.

use thiserror::Error;
use url::Url;

/// Port the proxy listens on when none is given.
pub const DEFAULT_PORT: u16 = 8080;

/// Interface the proxy binds to when none is given.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Errors produced while validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("an origin URL is required (--origin)")]
    MissingOrigin,

    #[error("invalid origin URL {value:?}: {reason}")]
    InvalidOrigin { value: String, reason: String },

    #[error("unsupported origin scheme {scheme:?}: expected http or https")]
    UnsupportedScheme { scheme: String },

    #[error("admin path {value:?} must start with '/'")]
    InvalidAdminPath { value: String },
}

/// Base URL of the origin server, without a trailing slash.
///
/// # Examples
///
/// ```
/// use rttp_cache::config::Origin;
///
/// let origin = Origin::parse("http://backend.local:9000/api/").unwrap();
/// assert_eq!(origin.as_str(), "http://backend.local:9000/api");
/// assert_eq!(
///     origin.target("/users", Some("page=2")),
///     "http://backend.local:9000/api/users?page=2"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    base: String,
}

impl Origin {
    /// Validates an absolute `http`/`https` URL and strips trailing slashes.
    ///
    /// # Errors
    ///
    /// Fails if `raw` is not an absolute URL, has another scheme, lacks a
    /// host, or carries a query or fragment (which could not be combined with
    /// the forwarded path).
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidOrigin {
            value: raw.to_owned(),
            reason: reason.to_owned(),
        };

        let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme {
                scheme: url.scheme().to_owned(),
            });
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("must not contain a query or fragment"));
        }

        Ok(Self {
            base: url.as_str().trim_end_matches('/').to_owned(),
        })
    }

    /// Returns the base URL.
    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// Appends an inbound path and query string to the base URL.
    pub fn target(&self, path: &str, query: Option<&str>) -> String {
        let mut target = String::with_capacity(self.base.len() + path.len() + 16);
        target.push_str(&self.base);
        if !path.starts_with('/') {
            target.push('/');
        }
        target.push_str(path);
        if let Some(query) = query {
            target.push('?');
            target.push_str(query);
        }
        target
    }
}

/// Everything the proxy needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub origin: Origin,
    /// Path of the cache control endpoint; `None` keeps the proxy fully
    /// transparent.
    pub admin_path: Option<String>,
    /// Allow-all CORS: answer preflights locally and let any origin read
    /// responses.
    pub cors: bool,
}

impl ProxyConfig {
    /// Builds a validated configuration.
    ///
    /// # Errors
    ///
    /// See [`Origin::parse`]; additionally rejects an admin path that does
    /// not start with `/`.
    pub fn new(port: u16, origin: &str, admin_path: Option<String>) -> Result<Self, ConfigError> {
        let origin = Origin::parse(origin)?;
        let admin_path = admin_path.map(validate_admin_path).transpose()?;
        Ok(Self {
            host: DEFAULT_HOST.to_owned(),
            port,
            origin,
            admin_path,
            cors: false,
        })
    }

    /// Overrides the bind interface.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Enables or disables allow-all CORS.
    #[must_use]
    pub fn with_cors(mut self, cors: bool) -> Self {
        self.cors = cors;
        self
    }

    /// `host:port` string suitable for [`crate::server::Server::bind`].
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn validate_admin_path(path: String) -> Result<String, ConfigError> {
    if !path.starts_with('/') {
        return Err(ConfigError::InvalidAdminPath { value: path });
    }
    let trimmed = path.trim_end_matches('/');
    Ok(if trimmed.is_empty() {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    })
}
