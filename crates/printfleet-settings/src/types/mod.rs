//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`,
//! so a partial file only overrides what it names.

mod machines;
mod server;

pub use machines::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type for the hub.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "machines": { "configurationsPath": "machines.json" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FleetSettings {
    /// Network settings.
    pub server: ServerSettings,
    /// Log output and history.
    pub logging: LoggingSettings,
    /// Device connections and stores.
    pub machines: MachineSettings,
}

impl FleetSettings {
    /// Reject values that would make the hub unusable.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.server.ws_path.starts_with('/') {
            return Err(crate::SettingsError::InvalidValue(format!(
                "server.wsPath must start with '/', got '{}'",
                self.server.ws_path
            )));
        }
        if self.server.outbound_queue_capacity == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "server.outboundQueueCapacity must be at least 1".to_string(),
            ));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be at least 1".to_string(),
            ));
        }
        if self.logging.history_capacity == 0 || self.machines.event_history_capacity == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "history capacities must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ── Tests ──
