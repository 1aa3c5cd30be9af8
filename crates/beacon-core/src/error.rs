//! Error types and result handling for the event gateway.
//!
//! Defines the gateway error taxonomy with stable codes and HTTP status
//! mapping, plus the internal error type raised when typed extraction of an
//! already validated payload fails.

use thiserror::Error;

use crate::{
    models::{UpstreamErrorCode, UpstreamStatus},
    validation::FieldError,
};

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for internal operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A required field was absent from the payload.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field was present but could not be converted to its typed form.
    #[error("invalid field {field}: {message}")]
    InvalidField {
        /// Name of the offending field
        field: &'static str,
        /// Description of the conversion failure
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid field error.
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField { field, message: message.into() }
    }
}

/// Beacon error taxonomy with codes for client disambiguation.
#[derive(Debug, Clone, Error)]
pub enum BeaconError {
    // Client errors (E1001-E1002)
    /// Payload failed validation (E1001).
    #[error("[E1001] Invalid payload: {} violation(s)", violations.len())]
    InvalidPayload {
        /// Every violation found, in check order
        violations: Vec<FieldError>,
    },

    /// Event id already seen within the retention window (E1002).
    ///
    /// Not a failure: callers answer it as a recognized no-op.
    #[error("[E1002] Duplicate event: {event_id} already processed")]
    DuplicateEvent {
        /// The caller-assigned event id
        event_id: String,
    },

    // Upstream errors (E2001-E2002)
    /// Downstream answered with a class that retrying cannot fix (E2001).
    #[error("[E2001] Terminal upstream error: {code} ({status}) after {attempts} attempt(s)")]
    TerminalUpstream {
        /// Classified error code
        code: UpstreamErrorCode,
        /// Last observed upstream status
        status: UpstreamStatus,
        /// Number of attempts made
        attempts: u32,
    },

    /// Downstream kept failing transiently until the attempt cap (E2002).
    #[error("[E2002] Retryable upstream error: {code} ({status}) after {attempts} attempt(s)")]
    RetryableUpstream {
        /// Classified error code
        code: UpstreamErrorCode,
        /// Last observed upstream status
        status: UpstreamStatus,
        /// Number of attempts made
        attempts: u32,
    },

    // System errors (E3001)
    /// Unexpected failure in the gateway's own logic (E3001).
    #[error("[E3001] Internal error: {message}")]
    Internal {
        /// Internal description, logged but never returned to callers
        message: String,
    },
}

impl BeaconError {
    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Returns the error code (E1001-E3001).
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidPayload { .. } => "E1001",
            Self::DuplicateEvent { .. } => "E1002",
            Self::TerminalUpstream { .. } => "E2001",
            Self::RetryableUpstream { .. } => "E2002",
            Self::Internal { .. } => "E3001",
        }
    }

    /// Returns the HTTP status code the gateway answers with.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidPayload { .. } => 400,
            Self::DuplicateEvent { .. } => 200,
            Self::TerminalUpstream { .. } | Self::RetryableUpstream { .. } => 502,
            Self::Internal { .. } => 500,
        }
    }

    /// Returns whether the failure class is transient.
    ///
    /// Retryable upstream errors have already been retried by the dispatcher
    /// by the time they surface here.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableUpstream { .. })
    }
}

impl From<CoreError> for BeaconError {
    fn from(err: CoreError) -> Self {
        Self::internal(err.to_string())
    }
}
