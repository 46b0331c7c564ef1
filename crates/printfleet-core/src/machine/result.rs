//! Outcome of a machine operation.

use serde::Serialize;

use super::message::{MachineMessage, MessageSeverity};

/// Success, or a failure explained by a [`MachineMessage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineOperationResult {
    /// Whether the operation succeeded.
    pub is_success: bool,
    /// Why it failed. Absent on success.
    #[serde(rename = "FailureMessage", skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<MachineMessage>,
}

impl MachineOperationResult {
    /// Success.
    pub fn ok() -> Self {
        Self {
            is_success: true,
            reasoning: None,
        }
    }

    /// Failure explained by `message`, promoted to error severity.
    pub fn fail(message: MachineMessage) -> Self {
        Self {
            is_success: false,
            reasoning: Some(message.with_severity(MessageSeverity::Error)),
        }
    }

    /// Failure with `message`'s title and a replacement body.
    pub fn fail_with_body(message: MachineMessage, body: impl Into<String>) -> Self {
        let mut message = message;
        message.body = body.into();
        Self::fail(message)
    }

    /// `"{title}; {body}"` of the failure.
    pub fn failure_reason(&self) -> Option<String> {
        self.reasoning.as_ref().map(MachineMessage::reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::catalog;

    #[test]
    fn ok_has_no_reason() {
        let result = MachineOperationResult::ok();
        assert!(result.is_success);
        assert!(result.failure_reason().is_none());
    }

    #[test]
    fn fail_forces_error_severity() {
        let msg = MachineMessage::new("t", "b", MessageSeverity::Info);
        let result = MachineOperationResult::fail(msg);
        assert!(!result.is_success);
        assert_eq!(result.reasoning.unwrap().severity, MessageSeverity::Error);
    }

    #[test]
    fn fail_with_body_keeps_title() {
        let result = MachineOperationResult::fail_with_body(catalog::failed_to_pause(), "Timed out");
        assert_eq!(result.failure_reason().as_deref(), Some("Unable to Pause; Timed out"));
    }
}
