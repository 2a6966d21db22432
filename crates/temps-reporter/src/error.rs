//! Error types for the reporter SDK

use thiserror::Error;

/// Errors raised while resolving configuration.
///
/// Fatal at init time, but a running client only disables sending.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid DSN: {reason}")]
    InvalidDsn { reason: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Unknown configuration field: {0}")]
    UnknownField(String),
}

impl ConfigError {
    pub(crate) fn invalid_dsn(reason: impl Into<String>) -> Self {
        ConfigError::InvalidDsn {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_value(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Transport level failures. Recovered inside the transport by
/// retry-then-discard and never returned from a capture call.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Server rejected envelope with status {status}")]
    Status { status: u16 },

    #[error("Rate limited by server")]
    RateLimited,

    #[error("Failed to start delivery runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl SendError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SendError::Http(_) => true,
            SendError::Status { status } => *status >= 500,
            SendError::Serialization(_) | SendError::RateLimited | SendError::Runtime(_) => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("No client is bound to the hub")]
    NotInitialized,
}

/// Raised by the test harness when a test is wired incorrectly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    #[error("please make sure the SDK is initialized for testing")]
    NotInitialized,

    #[error("the hub was rebound after setup; teardown would clobber another client")]
    ClientReplaced,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<HubError> for HarnessError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::NotInitialized => HarnessError::NotInitialized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_errors_retry_only_on_server_failures() {
        assert!(SendError::Status { status: 503 }.is_retryable());
        assert!(!SendError::Status { status: 400 }.is_retryable());
        assert!(!SendError::RateLimited.is_retryable());
    }

    #[test]
    fn test_hub_error_maps_to_harness_error() {
        let err: HarnessError = HubError::NotInitialized.into();
        assert_eq!(err, HarnessError::NotInitialized);
        assert_eq!(
            err.to_string(),
            "please make sure the SDK is initialized for testing"
        );
    }

    #[test]
    fn test_config_error_wraps_into_harness_error() {
        let err: HarnessError = ConfigError::UnknownField("colour".to_string()).into();
        assert_eq!(
            err,
            HarnessError::Config(ConfigError::UnknownField("colour".to_string()))
        );
        assert_ne!(err, HarnessError::ClientReplaced);
    }
}
