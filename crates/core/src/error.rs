//! Error types for order execution and quote retrieval.
//!
//! Executors report transport and broker failures through [`ExecutionError`].
//! Only authentication failures are fatal; everything else surfaces to the
//! strategy as a failed order.

use thiserror::Error;

/// Errors that can occur when talking to the broker.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Access token rejected. The process must stop trading.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Broker throttled the request.
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimited {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// API request failed.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error message from the broker.
        message: String,
    },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Order rejected by the broker.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ExecutionError {
    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a rate limit error.
    pub const fn rate_limited(attempts: u32) -> Self {
        Self::RateLimited { attempts }
    }

    /// Returns true if the request may succeed when repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. }
        )
    }

    /// Returns true if the broker asked us to slow down.
    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns true if trading must stop.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for execution operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// True when an `anyhow` error chain carries a fatal [`ExecutionError`].
#[must_use]
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ExecutionError>())
        .any(ExecutionError::is_fatal)
}
