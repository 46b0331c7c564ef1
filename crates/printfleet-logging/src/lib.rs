//! # printfleet-logging
//!
//! Structured logging with `tracing`, plus an in-memory log history.
//!
//! - [`init_subscriber`] installs stderr output only.
//! - [`init_subscriber_with_hub`] adds a [`HubLayer`] that publishes every
//!   event into a [`BroadcastHub<LogEntry>`](printfleet_core::BroadcastHub),
//!   which backs the `log/history` and `log/subscribe` actions.
//!
//! Log context (session, machine, action) travels through span fields rather
//! than ambient state.

#![deny(unsafe_code)]

pub mod layer;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;

use std::sync::Arc;

use printfleet_core::BroadcastHub;

pub use layer::{DEFAULT_HISTORY_CAPACITY, HubLayer};
#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::{CapturedLogs, capture_logs};
pub use types::{LogEntry, LogLevel};

/// Initialize the global tracing subscriber with stderr output only.
///
/// `RUST_LOG` takes precedence over `level`. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with stderr output and a log
/// history hub of `capacity` entries. Returns the hub.
pub fn init_subscriber_with_hub(level: &str, capacity: usize) -> Arc<BroadcastHub<LogEntry>> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let hub = Arc::new(BroadcastHub::new(capacity));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(HubLayer::new(Arc::clone(&hub)))
        .try_init();

    hub
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_does_not_panic() {
        init_subscriber("warn");
        init_subscriber("debug");
    }

    #[test]
    fn init_with_hub_returns_sized_hub() {
        let hub = init_subscriber_with_hub("info", 42);
        assert_eq!(hub.capacity(), 42);
    }
}
