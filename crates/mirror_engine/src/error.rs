//! Error types for the sync engine.

use mirror_protocol::{DeviceId, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Credentials were rejected. Only re-pairing recovers from this.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote call did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// Protocol error (malformed response).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Coordinator setup failed.
    #[error("setup failed: {0}")]
    Setup(String),

    /// The device is not managed by this coordinator.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    /// The coordinator has been shut down.
    #[error("coordinator is shutting down")]
    ShuttingDown,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error means the credentials are no longer valid.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::AuthenticationFailed(_))
    }

    /// Returns true if this error is expected to clear up on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Protocol(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Protocol(ProtocolError::MissingId).is_retryable());
        assert!(!SyncError::AuthenticationFailed("expired".into()).is_retryable());
        assert!(!SyncError::ShuttingDown.is_retryable());
    }

    #[test]
    fn auth_classification() {
        assert!(SyncError::AuthenticationFailed("expired".into()).is_auth());
        assert!(!SyncError::Timeout.is_auth());
    }

    #[test]
    fn error_display() {
        let err = SyncError::UnknownDevice(DeviceId::new("ABC123"));
        assert_eq!(err.to_string(), "unknown device ABC123");

        let err = SyncError::transport_retryable("connection reset");
        assert_eq!(err.to_string(), "transport error: connection reset");
    }
}
