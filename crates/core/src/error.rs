//! Unified error types for the sync service.
//!
//! Error codes (the last four appear in logs only):
//! - VALID_001: Validation errors
//! - STORE_001: Durable or cross-tab storage unavailable
//! - RATE_001: Quota exceeded
//! - CHAN_001: Live channel failures
//! - CB_001: Consumer callback failures
//! - INT_001: Internal errors

use std::any::Any;

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error codes surfaced to callers and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// VALID_001: Missing or malformed input
    Validation,
    /// RATE_001: Quota exceeded
    QuotaExceeded,
    /// STORE_001: Storage backend unreachable
    StorageUnavailable,
    /// CHAN_001: Live channel errored, timed out, or closed
    Channel,
    /// CB_001: Consumer callback failed
    Callback,
    /// INT_001: Anything else
    Internal,
}

impl ErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation => "VALID_001",
            Self::QuotaExceeded => "RATE_001",
            Self::StorageUnavailable => "STORE_001",
            Self::Channel => "CHAN_001",
            Self::Callback => "CB_001",
            Self::Internal => "INT_001",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::QuotaExceeded => 429,
            Self::StorageUnavailable => 503,
            Self::Channel => 503,
            Self::Callback => 500,
            Self::Internal => 500,
        }
    }
}

/// How a boundary reacts when the infrastructure behind it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Permit the operation and surface a warning.
    FailOpen,
    /// Reject the operation with the underlying error.
    FailClosed,
}

/// Errors from a durable or cross-tab storage backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("backend unreachable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("encoding failed: {0}")]
    Encoding(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }
}

/// Status failures reported by a live channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel error: {0}")]
    Errored(String),

    #[error("channel subscribe timed out")]
    TimedOut,

    #[error("channel closed")]
    Closed,
}

/// Failure raised by a consumer-supplied callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallbackError(String);

impl CallbackError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Build from a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "callback panicked".to_string()
        };
        Self(format!("panic: {msg}"))
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Unified error type for the sync service.
///
/// Quota denials, channel failures, and callback failures are recovered
/// where they happen and never cross an API boundary as errors; their codes
/// appear in logs only.
#[derive(Debug, Error)]
pub enum Error {
    #[error("[VALID_001] {0}")]
    Validation(String),

    #[error("[STORE_001] {0}")]
    StorageUnavailable(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Get the coded category for this error.
    pub fn kind(&self) -> ErrorCode {
        match self {
            Self::Validation(_) | Self::Serialization(_) => ErrorCode::Validation,
            Self::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
        }
    }

    /// Get the error code string.
    pub fn error_code(&self) -> &'static str {
        self.kind().code()
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }
}
