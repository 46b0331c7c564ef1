//! Log capture for tests.
//!
//! Events are recorded through a [`HubLayer`] into a private history, so
//! assertions see the same [`LogEntry`] values `log/history` would serve.

use std::sync::Arc;

use printfleet_core::BroadcastHub;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::{HubLayer, LogEntry, LogLevel};

const CAPTURE_CAPACITY: usize = 1024;

/// Entries recorded by [`capture_logs`].
#[derive(Clone)]
pub struct CapturedLogs {
    hub: Arc<BroadcastHub<LogEntry>>,
}

impl CapturedLogs {
    /// Recorded entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.hub.entries().collect()
    }

    /// Whether an entry at `level` has a message containing `text`.
    pub fn has_event(&self, level: LogLevel, text: &str) -> bool {
        self.hub.entries().any(|e| e.level == level && e.message.contains(text))
    }
}

/// Record every event emitted on the current thread until the guard drops.
///
/// Async tests need the current-thread runtime for their events to land here.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let hub = Arc::new(BroadcastHub::new(CAPTURE_CAPACITY));
    let guard = tracing_subscriber::registry()
        .with(HubLayer::new(Arc::clone(&hub)).with_min_level(LogLevel::Trace))
        .set_default();
    (CapturedLogs { hub }, guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_level_and_message() {
        let (logs, _guard) = capture_logs();
        tracing::debug!("connecting");
        tracing::warn!("link dropped");

        assert!(logs.has_event(LogLevel::Warn, "dropped"));
        assert!(!logs.has_event(LogLevel::Warn, "connecting"));
        assert_eq!(logs.entries().len(), 2);
    }

    #[test]
    fn records_event_fields() {
        let (logs, _guard) = capture_logs();
        tracing::warn!(action = "machine/pause", "unknown action");

        let entries = logs.entries();
        assert_eq!(entries[0].fields.get("action"), Some(&serde_json::json!("machine/pause")));
    }

    #[test]
    fn nothing_recorded_after_guard_drops() {
        let (logs, guard) = capture_logs();
        drop(guard);
        tracing::error!("late");
        assert!(logs.entries().is_empty());
    }
}
