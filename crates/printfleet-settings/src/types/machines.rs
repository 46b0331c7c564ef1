//! Machine connection and storage settings.

use serde::{Deserialize, Serialize};

/// Settings for device connections and the stores backing them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MachineSettings {
    /// Connect attempt timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Timeout of a mutate-until operation (pause, resume...) in milliseconds.
    pub operation_timeout_ms: u64,
    /// Interval of the reconnect sweep in seconds.
    pub reconnect_interval_secs: u64,
    /// JSON file holding stored machine configurations. Relative paths
    /// resolve against `~/.printfleet`. In-memory store when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configurations_path: Option<String>,
    /// Upper bound of the in-memory file store, in bytes.
    pub files_max_bytes: u64,
    /// Queue capacity of each fleet event subscriber.
    pub event_queue_capacity: usize,
    /// Fleet events kept in the hub ring.
    pub event_history_capacity: usize,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            operation_timeout_ms: 30_000,
            reconnect_interval_secs: 30,
            configurations_path: None,
            files_max_bytes: 512 * 1024 * 1024,
            event_queue_capacity: 1024,
            event_history_capacity: 256,
        }
    }
}

// ── Tests ──
