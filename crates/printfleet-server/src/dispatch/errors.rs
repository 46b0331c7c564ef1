//! Dispatch error type.

use std::time::Duration;

use thiserror::Error;

/// Why a message produced no regular response.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The frame is not a JSON object.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// `Action` is missing or blank.
    #[error("envelope has no action")]
    MissingAction,

    /// No action is registered under the name.
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// The action takes a payload but `Data` is absent or null.
    #[error("action '{0}' requires a payload")]
    MissingPayload(String),

    /// `Data` does not deserialize into the action's payload type.
    #[error("Failed to Deserialize; {reason}")]
    MalformedPayload {
        action: String,
        message_id: Option<String>,
        reason: String,
    },

    /// The handler returned an error.
    #[error("{0}")]
    Handler(String),

    /// The handler outlived the handler timeout.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    /// The handler panicked.
    #[error("handler panicked")]
    Panicked,

    /// The handler's result could not be serialized.
    #[error("failed to serialize result: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Handler failure with `message`.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Label for the `error_type` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidEnvelope(_) => "invalid_envelope",
            Self::MissingAction => "missing_action",
            Self::UnknownAction(_) => "unknown_action",
            Self::MissingPayload(_) => "missing_payload",
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::Handler(_) => "handler",
            Self::Timeout(_) => "timeout",
            Self::Panicked => "panic",
            Self::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_payload_message_is_client_facing() {
        let err = DispatchError::MalformedPayload {
            action: "machine/pause".into(),
            message_id: None,
            reason: "missing field `MachineID`".into(),
        };
        assert_eq!(err.to_string(), "Failed to Deserialize; missing field `MachineID`");
        assert_eq!(err.kind(), "malformed_payload");
    }

    #[test]
    fn handler_error_displays_message() {
        assert_eq!(DispatchError::handler("boom").to_string(), "boom");
    }
}
