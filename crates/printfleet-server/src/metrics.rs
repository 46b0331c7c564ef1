//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder. Call once at startup, before any
/// metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric names recorded across the workspace.

/// Actions received (counter, labels: action).
pub const ACTION_REQUESTS_TOTAL: &str = "action_requests_total";
/// Actions that produced no response (counter, labels: action, error_type).
pub const ACTION_ERRORS_TOTAL: &str = "action_errors_total";
/// Handler run time (histogram, labels: action).
pub const ACTION_DURATION_SECONDS: &str = "action_duration_seconds";
/// Sessions accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Sessions open (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Sessions closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Session lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Outbound messages dropped on a full session queue (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Machine connect attempts (counter).
pub const MACHINE_CONNECT_ATTEMPTS_TOTAL: &str = "machine_connect_attempts_total";
/// Machine connect failures (counter).
pub const MACHINE_CONNECT_FAILURES_TOTAL: &str = "machine_connect_failures_total";
/// Fleet events published (counter, labels: kind).
pub const FLEET_EVENTS_PUBLISHED_TOTAL: &str = "fleet_events_published_total";
