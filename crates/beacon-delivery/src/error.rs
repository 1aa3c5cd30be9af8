//! Error types for downstream delivery operations.
//!
//! A downstream that answers with any HTTP status has not failed at this
//! layer; statuses are classified by the dispatcher. These errors cover the
//! cases where no usable response exists at all, plus configuration problems
//! found while building a downstream.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failures raised while talking to the downstream API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// The attempt exceeded its time budget.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Budget that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// Invalid downstream configuration.
    #[error("invalid downstream configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Determines if this error represents a temporary failure that should be
    /// retried.
    ///
    /// Returns `true` for network errors and timeouts. Configuration and
    /// internal errors will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } => true,
            Self::ConfigurationError { .. } | Self::InternalError { .. } => false,
        }
    }
}
