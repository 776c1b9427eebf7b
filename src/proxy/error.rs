use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a forward attempt produced no usable origin response.
///
/// The pipeline turns [`Upstream`](Self::Upstream) into `502 Bad Gateway`
/// and [`Internal`](Self::Internal) into `500 Internal Server Error`.
/// Neither is retried.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The origin could not be reached or the exchange with it broke down:
    /// refused, unreachable, timed out, or a protocol or body error.
    #[error("origin request to {target} failed: {source}")]
    Upstream {
        target: String,
        #[source]
        source: BoxError,
    },

    /// Anything else, such as an outbound request that could not be built.
    #[error("internal forwarding failure: {reason}")]
    Internal { reason: String },
}

impl ForwardError {
    pub fn upstream(target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Upstream {
            target: target.into(),
            source: source.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Classifies a transport error: only failures to *build* the request
    /// are ours, everything the client hit on the wire is the origin's.
    pub(crate) fn from_reqwest(target: &str, error: reqwest::Error) -> Self {
        if error.is_builder() {
            Self::internal(error.to_string())
        } else {
            Self::upstream(target, error)
        }
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }
}
