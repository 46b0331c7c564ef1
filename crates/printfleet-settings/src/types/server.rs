//! Server and logging settings.

use serde::{Deserialize, Serialize};

/// HTTP and WebSocket server settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks an ephemeral port.
    pub port: u16,
    /// Path of the WebSocket endpoint.
    pub ws_path: String,
    /// Bounded outbound queue per session.
    pub outbound_queue_capacity: usize,
    /// Per-action handler timeout in milliseconds.
    pub handler_timeout_ms: u64,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// WebSocket ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Grace period for in-flight tasks on shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5454,
            ws_path: "/ws".to_string(),
            outbound_queue_capacity: 256,
            handler_timeout_ms: 60_000,
            max_message_size: 1024 * 1024,
            heartbeat_interval_secs: 30,
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// Log output and in-memory log history settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Entries kept for `log/history`.
    pub history_capacity: usize,
    /// Queue capacity of each log subscriber.
    pub subscriber_queue_capacity: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            history_capacity: 500,
            subscriber_queue_capacity: 200,
        }
    }
}

// ── Tests ──
