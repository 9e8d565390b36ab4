//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// A malformed event or response from the remote device API.
///
/// Event-level variants are anomalies: the offending event is skipped and
/// the rest of its batch is still processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The event has no `id`.
    #[error("event is missing an id")]
    MissingId,

    /// The event `id` is neither a string nor an integer.
    #[error("event id has unsupported form: {0}")]
    InvalidId(String),

    /// The event has no `type`.
    #[error("event {id} is missing a type")]
    MissingType {
        /// Event id.
        id: String,
    },

    /// The event `type` is not one the mirror understands.
    #[error("event {id} has unknown type {event_type:?}")]
    UnknownType {
        /// Event id.
        id: String,
        /// Reported type.
        event_type: String,
    },

    /// The event `data` is absent or not a mapping.
    #[error("event {id} payload is not a mapping")]
    InvalidPayload {
        /// Event id.
        id: String,
    },

    /// A response body could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::InvalidResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::UnknownType {
            id: "7".into(),
            event_type: "heartbeat".into(),
        };
        assert_eq!(err.to_string(), "event 7 has unknown type \"heartbeat\"");
        assert_eq!(ProtocolError::MissingId.to_string(), "event is missing an id");
    }

    #[test]
    fn json_errors_become_invalid_response() {
        let err: ProtocolError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ProtocolError::InvalidResponse(_)));
    }
}
