//! Error taxonomy for the locator service.
//!
//! Callers see [`LocatorError`]. Store backends and the event log have their own
//! error types so adapters never need to know about service-level concerns.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to callers of the locator service.
#[derive(Debug, Error)]
pub enum LocatorError {
    /// Malformed input, rejected before the store is touched. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The backing store could not serve the request. Callers retry with backoff.
    #[error("location store unavailable: {0}")]
    StoreUnavailable(String),

    /// The caller-supplied deadline elapsed before the store answered.
    #[error("store deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The agent has no live record (expired or never seen).
    #[error("agent not found: {0}")]
    NotFound(String),
}

impl LocatorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether a retry after backoff can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::DeadlineExceeded(_))
    }
}

/// Errors raised by a [`crate::store::LocationStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),

    #[error("stored value could not be decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<StoreError> for LocatorError {
    fn from(err: StoreError) -> Self {
        LocatorError::StoreUnavailable(err.to_string())
    }
}

/// Errors raised while appending to the durable event log.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("event could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("event forwarder queue is closed")]
    Closed,
}

/// Errors raised while loading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

pub type LocatorResult<T> = Result<T, LocatorError>;
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_and_store_errors_are_transient() {
        assert!(LocatorError::DeadlineExceeded(Duration::from_millis(5)).is_transient());
        assert!(LocatorError::StoreUnavailable("down".into()).is_transient());
        assert!(!LocatorError::validation("bad latitude").is_transient());
        assert!(!LocatorError::NotFound("a-1".into()).is_transient());
    }

    #[test]
    fn store_errors_map_to_store_unavailable() {
        let err: LocatorError = StoreError::Unavailable("connection reset".into()).into();
        assert!(matches!(err, LocatorError::StoreUnavailable(_)));
        assert!(err.to_string().contains("connection reset"));
    }
}
