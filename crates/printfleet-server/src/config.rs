//! Server configuration.

use std::time::Duration;

use printfleet_settings::ServerSettings;

/// Configuration for the action server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Route accepting WebSocket upgrades.
    pub ws_path: String,
    /// Per-session outbound queue length. A full queue drops the newest
    /// message and counts it against the session.
    pub outbound_queue_capacity: usize,
    /// Maximum time a single action handler may run.
    pub handler_timeout: Duration,
    /// Largest accepted inbound frame.
    pub max_message_size: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for tracked tasks.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/ws".into(),
            outbound_queue_capacity: 256,
            handler_timeout: Duration::from_secs(60),
            max_message_size: 1024 * 1024,
            heartbeat_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            ws_path: settings.ws_path.clone(),
            outbound_queue_capacity: settings.outbound_queue_capacity,
            handler_timeout: Duration::from_millis(settings.handler_timeout_ms),
            max_message_size: settings.max_message_size,
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs),
            shutdown_timeout: Duration::from_millis(settings.shutdown_timeout_ms),
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
