//! Structured diagnostics attached to a machine.
//!
//! Operational failures are raised as [`MachineMessage`]s rather than
//! errors. A message stays in the machine's state until its
//! [`AutoResolve`] condition is observed true after a commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::state::MachineState;
use super::status::MachineStatus;

/// How serious a message is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageSeverity {
    /// Informational.
    #[default]
    Info = 0,
    /// Something completed.
    Success = 1,
    /// Needs attention.
    Warning = 2,
    /// An operation failed.
    Error = 3,
}

/// Who raised a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageSource {
    /// The hub's connector for the machine.
    #[default]
    Connector,
    /// The machine itself.
    Machine,
}

flag_set! {
    /// Actions an operator can take to resolve a message.
    MessageActions {
        /// Resume the job.
        RESUME = 1 => "Resume",
        /// Pause the job.
        PAUSE = 2 => "Pause",
        /// Cancel the job.
        CANCEL = 4 => "Cancel",
        /// Refresh the machine state.
        REFRESH = 8 => "Refresh",
        /// Review the machine configuration.
        CHECK_CONFIGURATION = 16 => "CheckConfiguration",
        /// Firmware is not supported.
        UNSUPPORTED_FIRMWARE = 32 => "UnsupportedFirmware",
        /// Clear the build plate.
        CLEAR_BED = 64 => "ClearBed",
    }
}

/// Condition under which a message clears itself. Conditions are ORed;
/// an empty condition never resolves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AutoResolve {
    /// Clear once the machine reports connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_connected: Option<bool>,
    /// Clear once the machine reaches this status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_status: Option<MachineStatus>,
    /// Clear once the machine is printing (or has just printed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_printing: Option<bool>,
}

impl AutoResolve {
    /// Never resolves automatically.
    pub const NEVER: Self = Self {
        when_connected: None,
        when_status: None,
        when_printing: None,
    };

    /// Resolve on the next successful connect.
    pub const fn when_connected() -> Self {
        Self {
            when_connected: Some(true),
            ..Self::NEVER
        }
    }

    /// Resolve when `status` is reached.
    pub const fn when_status(status: MachineStatus) -> Self {
        Self {
            when_status: Some(status),
            ..Self::NEVER
        }
    }

    /// Resolve once printing.
    pub const fn when_printing() -> Self {
        Self {
            when_printing: Some(true),
            ..Self::NEVER
        }
    }

    /// Whether no condition is set.
    pub fn is_never(&self) -> bool {
        *self == Self::NEVER
    }

    /// Whether `state` satisfies any of the conditions.
    pub fn is_satisfied_by(&self, state: &MachineState) -> bool {
        if self.when_connected == Some(true) && state.is_connected {
            return true;
        }
        if self.when_status.is_some_and(|status| status == state.status) {
            return true;
        }
        self.when_printing == Some(true)
            && matches!(state.status, MachineStatus::Printing | MachineStatus::Printed)
    }
}

/// A structured diagnostic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineMessage {
    /// Short headline.
    pub title: String,
    /// Details.
    pub body: String,
    /// Severity.
    pub severity: MessageSeverity,
    /// Raiser.
    pub source: MessageSource,
    /// Actions that resolve it manually.
    pub manual_resolve: MessageActions,
    /// Condition that resolves it automatically.
    pub auto_resolve: AutoResolve,
    /// When it was raised.
    pub issued_at: DateTime<Utc>,
}

impl MachineMessage {
    /// A connector-raised message issued now.
    pub fn new(title: impl Into<String>, body: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity,
            source: MessageSource::Connector,
            manual_resolve: MessageActions::NONE,
            auto_resolve: AutoResolve::NEVER,
            issued_at: Utc::now(),
        }
    }

    /// Set the auto-resolve condition.
    #[must_use]
    pub fn with_auto_resolve(mut self, auto_resolve: AutoResolve) -> Self {
        self.auto_resolve = auto_resolve;
        self
    }

    /// Set the manual resolve actions.
    #[must_use]
    pub fn with_actions(mut self, actions: MessageActions) -> Self {
        self.manual_resolve = actions;
        self
    }

    /// Set the source.
    #[must_use]
    pub fn with_source(mut self, source: MessageSource) -> Self {
        self.source = source;
        self
    }

    /// Set the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: MessageSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Content signature: uppercase hex SHA-256 over title, body, severity,
    /// and manual-resolve actions. Issue time and source do not contribute,
    /// so re-raising the same diagnostic yields the same signature.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update(self.body.as_bytes());
        hasher.update((self.severity as i32).to_le_bytes());
        hasher.update(self.manual_resolve.bits().to_le_bytes());
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect()
    }

    /// `"{title}; {body}"`, the form sent to clients as a failure reason.
    pub fn reason(&self) -> String {
        format!("{}; {}", self.title, self.body)
    }
}

impl std::fmt::Display for MachineMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {} {}", self.severity, self.title, self.body)
    }
}

/// Messages raised by the hub itself.
pub mod catalog {
    use super::{AutoResolve, MachineMessage, MessageActions, MessageSeverity};
    use crate::machine::{MachineCapabilities, MachineStatus};

    /// Title of [`failed_to_connect`].
    pub const FAILED_TO_CONNECT: &str = "Unable to connect to Machine";
    /// Title of [`failed_to_pause`].
    pub const FAILED_TO_PAUSE: &str = "Unable to Pause";
    /// Title of [`failed_to_resume`].
    pub const FAILED_TO_RESUME: &str = "Unable to Resume";
    /// Title of [`failed_to_stop`].
    pub const FAILED_TO_STOP: &str = "Unable to stop the Machine";
    /// Title of [`failed_to_clear_bed`].
    pub const FAILED_TO_CLEAR_BED: &str = "Unable to Clear Bed";
    /// Title of [`failed_to_change_air_duct`].
    pub const FAILED_TO_CHANGE_AIR_DUCT: &str = "Unable to Change Air Duct Mode";
    /// Title of [`failed_to_set_light`].
    pub const FAILED_TO_SET_LIGHT: &str = "Unable to Change Light";
    /// Title of [`failed_to_update_configuration`].
    pub const FAILED_TO_UPDATE_CONFIGURATION: &str = "Unable to Update Configuration";
    /// Title of [`unsupported_feature`].
    pub const UNSUPPORTED_FEATURE: &str = "Unsupported Feature";

    /// Connect failed. Clears on the next successful connect.
    pub fn failed_to_connect() -> MachineMessage {
        MachineMessage::new(
            FAILED_TO_CONNECT,
            "An issue occurred connecting to this Machine",
            MessageSeverity::Error,
        )
        .with_auto_resolve(AutoResolve::when_connected())
    }

    /// Pause failed. Clears once paused.
    pub fn failed_to_pause() -> MachineMessage {
        MachineMessage::new(FAILED_TO_PAUSE, "An issue occurred pausing this Machine", MessageSeverity::Error)
            .with_auto_resolve(AutoResolve::when_status(MachineStatus::Paused))
    }

    /// Resume failed. Clears once printing.
    pub fn failed_to_resume() -> MachineMessage {
        MachineMessage::new(FAILED_TO_RESUME, "An issue occurred resuming this Machine", MessageSeverity::Error)
            .with_auto_resolve(AutoResolve::when_status(MachineStatus::Printing))
    }

    /// Stop failed. Clears once canceled.
    pub fn failed_to_stop() -> MachineMessage {
        MachineMessage::new(FAILED_TO_STOP, "An issue occurred stopping this Machine", MessageSeverity::Error)
            .with_auto_resolve(AutoResolve::when_status(MachineStatus::Canceled))
    }

    /// Clearing the bed failed. Clears once idle.
    pub fn failed_to_clear_bed() -> MachineMessage {
        MachineMessage::new(
            FAILED_TO_CLEAR_BED,
            "An issue occurred clearing the build plate",
            MessageSeverity::Error,
        )
        .with_auto_resolve(AutoResolve::when_status(MachineStatus::Idle))
    }

    /// Air duct change failed.
    pub fn failed_to_change_air_duct() -> MachineMessage {
        MachineMessage::new(
            FAILED_TO_CHANGE_AIR_DUCT,
            "An issue occurred changing the air duct mode",
            MessageSeverity::Error,
        )
    }

    /// Light change failed.
    pub fn failed_to_set_light() -> MachineMessage {
        MachineMessage::new(FAILED_TO_SET_LIGHT, "An issue occurred changing a light fixture", MessageSeverity::Error)
            .with_actions(MessageActions::REFRESH)
    }

    /// The adapter rejected a configuration change.
    pub fn failed_to_update_configuration(reason: impl Into<String>) -> MachineMessage {
        MachineMessage::new(FAILED_TO_UPDATE_CONFIGURATION, reason, MessageSeverity::Error)
            .with_actions(MessageActions::CHECK_CONFIGURATION)
    }

    /// The machine lacks `feature`.
    pub fn unsupported_feature(feature: MachineCapabilities) -> MachineMessage {
        MachineMessage::new(
            UNSUPPORTED_FEATURE,
            format!("Machine does not support feature {feature}"),
            MessageSeverity::Error,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MachineId;
    use crate::machine::MachineCapabilities;
    use crate::machine::state::MachineIdentity;

    fn state() -> MachineState {
        MachineState::new(MachineId::from("m1"), MachineIdentity::default())
    }

    #[test]
    fn signature_ignores_issue_time_and_source() {
        let a = catalog::failed_to_connect();
        let mut b = catalog::failed_to_connect().with_source(MessageSource::Machine);
        b.issued_at = a.issued_at + chrono::Duration::seconds(30);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn signature_depends_on_content() {
        let a = MachineMessage::new("t", "b", MessageSeverity::Info);
        let b = MachineMessage::new("t", "b", MessageSeverity::Error);
        let c = MachineMessage::new("t", "b", MessageSeverity::Info).with_actions(MessageActions::REFRESH);
        assert_ne!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn signature_is_uppercase_sha256_hex() {
        let sig = MachineMessage::new("a", "b", MessageSeverity::Info).signature();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn when_connected_resolves_on_connect() {
        let resolve = AutoResolve::when_connected();
        let mut s = state();
        assert!(!resolve.is_satisfied_by(&s));
        s.is_connected = true;
        assert!(resolve.is_satisfied_by(&s));
    }

    #[test]
    fn when_status_matches_exactly() {
        let resolve = AutoResolve::when_status(MachineStatus::Paused);
        let mut s = state();
        s.status = MachineStatus::Printing;
        assert!(!resolve.is_satisfied_by(&s));
        s.status = MachineStatus::Paused;
        assert!(resolve.is_satisfied_by(&s));
    }

    #[test]
    fn when_printing_accepts_printed() {
        let resolve = AutoResolve::when_printing();
        let mut s = state();
        s.status = MachineStatus::Printed;
        assert!(resolve.is_satisfied_by(&s));
    }

    #[test]
    fn never_is_never_satisfied() {
        let mut s = state();
        s.is_connected = true;
        s.status = MachineStatus::Printing;
        assert!(AutoResolve::NEVER.is_never());
        assert!(!AutoResolve::NEVER.is_satisfied_by(&s));
    }

    #[test]
    fn unsupported_feature_names_the_flag() {
        let msg = catalog::unsupported_feature(MachineCapabilities::AIR_DUCT);
        assert_eq!(msg.title, "Unsupported Feature");
        assert_eq!(msg.body, "Machine does not support feature AirDuct");
        assert_eq!(msg.reason(), "Unsupported Feature; Machine does not support feature AirDuct");
    }

    #[test]
    fn auto_resolve_omits_unset_fields() {
        let json = serde_json::to_value(AutoResolve::when_connected()).unwrap();
        assert_eq!(json, serde_json::json!({"WhenConnected": true}));
    }
}
