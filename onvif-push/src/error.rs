//! Error types for the onvif-push crate.
//!
//! These errors cover setup and storage. Failures while talking to a camera are
//! never returned to listeners as errors; the lifecycle turns them into
//! [`PushUpdate`](crate::PushUpdate) markers instead.

use soap_client::SoapError;

/// Errors that can occur while building or running the push manager.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A subscription value violates its invariants
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// Loading or saving persisted subscriptions failed
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// No webhook could be registered for a device
    #[error("Webhook error: {0}")]
    Webhook(String),

    /// The SOAP transport could not be created
    #[error("Transport error: {0}")]
    Transport(#[from] SoapError),

    /// An error occurred during shutdown
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// Errors from the storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Unsupported storage version: {0}")]
    UnsupportedVersion(u32),
}

/// Convenience type alias for Results with PushError.
pub type Result<T> = std::result::Result<T, PushError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PushError::Configuration("default lease must exceed the safety margin".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: default lease must exceed the safety margin"
        );

        let err = PushError::Webhook("no callback url".to_string());
        assert_eq!(err.to_string(), "Webhook error: no callback url");
    }

    #[test]
    fn test_store_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PushError = StoreError::from(io).into();
        assert!(matches!(err, PushError::Storage(StoreError::Io(_))));
        assert!(err.to_string().starts_with("Storage error: I/O error"));
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: PushError = SoapError::Network("builder".to_string()).into();
        assert!(matches!(err, PushError::Transport(_)));
    }
}
