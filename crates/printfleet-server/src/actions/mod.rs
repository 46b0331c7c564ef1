//! The fleet action set and per-session client state.
//!
//! [`register_all`] maps every log, machine, and file store action onto an
//! [`ActionRegistry<ClientState>`]. Pushes driven by fleet events are sent by
//! the [`bridge`] task.

pub mod bridge;
pub mod files;
pub mod logs;
pub mod machines;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use printfleet_core::{BroadcastHub, MachineId};
use printfleet_logging::LogEntry;
use printfleet_machines::ConnectionRegistry;
use serde::{Deserialize, Serialize};

use crate::dispatch::ActionRegistry;

pub use bridge::spawn_state_bridge;
pub use logs::LogPump;

// ── Topics ──

/// Start or retune the session's log subscription.
pub const LOG_SUBSCRIBE: &str = "log/subscribe";
/// Stop the session's log subscription.
pub const LOG_UNSUBSCRIBE: &str = "log/unsubscribe";
/// Query the log history.
pub const LOG_HISTORY: &str = "log/history";
/// Push topic of subscribed log batches.
pub const LOGS: &str = "logs";

/// List every machine.
pub const MACHINE_LIST: &str = "machine/list";
/// Subscribe to a machine's state.
pub const MACHINE_SUBSCRIBE: &str = "machine/subscribe";
/// Drop a machine subscription.
pub const MACHINE_UNSUBSCRIBE: &str = "machine/unsubscribe";
/// Confirm the bed is clear.
pub const MACHINE_MARK_AS_IDLE: &str = "machine/markAsIdle";
/// Pause the current job.
pub const MACHINE_PAUSE: &str = "machine/pause";
/// Resume the current job.
pub const MACHINE_RESUME: &str = "machine/resume";
/// Cancel the current job.
pub const MACHINE_STOP: &str = "machine/stop";
/// Every machine's adapter configuration.
pub const MACHINE_CONFIGURATION_ALL: &str = "machine/configuration/all";

/// Usage of the whole file store.
pub const FILE_STORE_TOTAL_USAGE: &str = "machineFileStore/totalUsage";
/// File store usage of one machine.
pub const FILE_STORE_MACHINE_USAGE: &str = "machineFileStore/machineUsage";

/// Push topic of a machine's state changes.
pub fn state_topic(machine_id: &MachineId) -> String {
    format!("machine/{machine_id}/state")
}

/// Push topic of a machine's configuration updates.
pub fn configuration_topic(machine_id: &MachineId) -> String {
    format!("machine/{machine_id}/configuration")
}

/// How much state a subscriber receives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateDetail {
    /// Configuration pushes only.
    #[default]
    None,
    /// Overview fields.
    AtAGlance,
    /// Every field.
    Full,
}

/// Extension state of a fleet client session.
#[derive(Debug, Default)]
pub struct ClientState {
    subscriptions: Mutex<HashMap<MachineId, StateDetail>>,
    log_pump: Mutex<Option<LogPump>>,
}

impl ClientState {
    /// Subscribe to `machine_id`, replacing an earlier detail level.
    pub fn subscribe(&self, machine_id: MachineId, detail: StateDetail) {
        let _ = self.subscriptions.lock().insert(machine_id, detail);
    }

    /// Returns whether a subscription existed.
    pub fn unsubscribe(&self, machine_id: &MachineId) -> bool {
        self.subscriptions.lock().remove(machine_id).is_some()
    }

    /// Detail level for `machine_id`, `None` when not subscribed.
    pub fn subscription(&self, machine_id: &MachineId) -> Option<StateDetail> {
        self.subscriptions.lock().get(machine_id).copied()
    }

    /// Number of machine subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Whether a log pump is running.
    pub fn is_receiving_logs(&self) -> bool {
        self.log_pump.lock().as_ref().is_some_and(|pump| !pump.is_finished())
    }

    pub(crate) fn log_pump(&self) -> &Mutex<Option<LogPump>> {
        &self.log_pump
    }
}

/// Services the fleet actions operate on.
#[derive(Clone)]
pub struct FleetContext {
    /// The fleet.
    pub machines: Arc<ConnectionRegistry>,
    /// Log history, also the source of log subscriptions.
    pub logs: Arc<BroadcastHub<LogEntry>>,
    /// Queue capacity of each log subscription.
    pub log_queue_capacity: usize,
}

impl FleetContext {
    /// Context with the default log queue capacity.
    pub fn new(machines: Arc<ConnectionRegistry>, logs: Arc<BroadcastHub<LogEntry>>) -> Self {
        Self {
            machines,
            logs,
            log_queue_capacity: 1024,
        }
    }
}

/// Register every fleet action. Returns how many were newly registered.
pub fn register_all(actions: &mut ActionRegistry<ClientState>, ctx: &FleetContext) -> usize {
    logs::register(actions, ctx) + machines::register(actions, ctx) + files::register(actions, ctx)
}
