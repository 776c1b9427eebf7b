//! Cache admission policy.

use crate::http::StatusCode;

/// Decides whether an origin response may be stored.
///
/// The pipeline consults the policy after every successful forward and only
/// writes to the store when it says yes; a rejected response never touches
/// an existing entry for the same key.
pub trait CachePolicy: Send + Sync {
    /// Returns `true` if a response with `status` should be stored.
    fn should_cache(&self, status: StatusCode) -> bool;
}

/// Stores 2xx responses only.
///
/// Redirects, client errors and server errors are relayed but never cached.
///
/// # Examples
///
/// ```
/// use rttp_cache::cache::{CachePolicy, SuccessOnly};
/// use rttp_cache::http::StatusCode;
///
/// assert!(SuccessOnly.should_cache(StatusCode::OK));
/// assert!(!SuccessOnly.should_cache(StatusCode::NOT_FOUND));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SuccessOnly;

impl CachePolicy for SuccessOnly {
    fn should_cache(&self, status: StatusCode) -> bool {
        status.is_success()
    }
}
