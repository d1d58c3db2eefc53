//! Error types for the limiter's outer surfaces.
//!
//! The admission decision itself never errors; these types cover configuration
//! loading and the tower middleware, which must turn a denial into an error the
//! surrounding service stack can map to a 429.

/// Unified error type returned by [`AdmissionService`](crate::middleware::AdmissionService).
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdmissionError<E> {
    /// The subject exhausted the route's quota for the current window.
    #[error("rate limited on route '{route}'; retry after {retry_after_secs}s")]
    RateLimited {
        /// Route the request was checked against.
        route: String,
        /// Seconds until the current window ends.
        retry_after_secs: u64,
    },
    /// The protected service failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> AdmissionError<E> {
    /// Check if this error is a rate-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Retry hint carried by a rejection.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            Self::Inner(_) => None,
        }
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RateLimited { .. } => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RateLimited { .. } => None,
        }
    }
}

/// Errors produced when loading or validating limiter configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Window length must be > 0 seconds.
    #[error("window must be > 0 seconds (got {provided})")]
    InvalidWindow {
        /// Value provided by caller.
        provided: u64,
    },
    /// A policy must admit at least one request per window.
    #[error("max must be > 0 (got {provided})")]
    InvalidMax {
        /// Value provided by caller.
        provided: u32,
    },
    /// A route-specific policy failed validation.
    #[error("invalid policy for route '{route}': {reason}")]
    InvalidRoute { route: String, reason: String },
    /// A duration setting must be > 0.
    #[error("{field} must be > 0")]
    ZeroDuration { field: &'static str },
    /// The configuration document could not be parsed.
    #[error("failed to parse limiter config: {0}")]
    Parse(#[from] serde_json::Error),
}
