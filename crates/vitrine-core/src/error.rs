//! Error types for the Vitrine collection view engine.

use std::time::Duration;
use thiserror::Error;

/// Fetch errors - surfaced to the view (except cancellation).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The request was superseded or its view went away.
    ///
    /// Internal bookkeeping only, never shown to the user.
    #[error("request cancelled")]
    Cancelled,

    /// Transport or server failure.
    #[error("network error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Network {
        status: Option<u16>,
        message: String,
    },

    /// The transport gave up waiting for a response.
    #[error("request timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Credentials expired and could not be refreshed.
    #[error("session expired")]
    AuthExpired,

    /// The response did not have the configured shape.
    #[error("response shape mismatch at '{path}'")]
    ShapeMismatch { path: String },
}

impl FetchError {
    /// Create a network error without a status code.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            status: None,
            message: message.into(),
        }
    }

    /// Check if this error only records that a request was superseded.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// Check if the user can meaningfully retry the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network { .. } | FetchError::Timeout { .. })
    }
}

/// A filter or query value rejected before any fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid value for '{field}': {message}")]
pub struct ValidationError {
    /// Filter key or query field that was rejected.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Loading a filter's option list failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OptionsError {
    /// No such filter, or it cannot have options.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The backend call failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl OptionsError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OptionsError::Fetch(e) if e.is_retryable())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config directory found.
    #[error("Config directory not found")]
    NoConfigDir,

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// Parse error.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Semantically invalid configuration.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(FetchError::Cancelled.is_cancellation());
        assert!(!FetchError::Cancelled.is_retryable());
        assert!(FetchError::network("reset").is_retryable());
        assert!(FetchError::Timeout {
            duration: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!FetchError::AuthExpired.is_retryable());
    }

    #[test]
    fn test_unknown_filter_is_not_retryable() {
        let err = OptionsError::from(ValidationError::new("brand", "unknown filter"));
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "invalid value for 'brand': unknown filter");
        assert!(OptionsError::from(FetchError::network("reset")).is_retryable());
    }

    #[test]
    fn test_network_error_display() {
        let err = FetchError::Network {
            status: Some(503),
            message: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "network error (503): unavailable");
        assert_eq!(
            FetchError::network("reset").to_string(),
            "network error: reset"
        );
    }
}
