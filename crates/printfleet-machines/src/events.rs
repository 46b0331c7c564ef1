//! Fleet-wide events published through the fleet hub.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use printfleet_core::MachineId;
use printfleet_core::machine::MachineStateChanges;
use serde_json::Value;

/// Something that happened to a machine of the fleet.
#[derive(Clone, Debug)]
pub enum FleetEvent {
    /// A commit changed observable state.
    StateChanged {
        /// Machine that changed.
        machine_id: MachineId,
        /// Fields that changed since the previous commit.
        changes: Arc<MachineStateChanges>,
        /// Commit time.
        time: DateTime<Utc>,
    },
    /// A machine was registered.
    MachineAdded {
        /// New machine.
        machine_id: MachineId,
        /// Registration time.
        time: DateTime<Utc>,
    },
    /// A machine was removed from the registry.
    MachineRemoved {
        /// Removed machine.
        machine_id: MachineId,
        /// Removal time.
        time: DateTime<Utc>,
    },
    /// A machine's adapter configuration was replaced.
    ConfigurationUpdated {
        /// Reconfigured machine.
        machine_id: MachineId,
        /// The new adapter configuration.
        configuration: Value,
        /// Update time.
        time: DateTime<Utc>,
    },
}

impl FleetEvent {
    /// Machine the event concerns.
    pub fn machine_id(&self) -> &MachineId {
        match self {
            Self::StateChanged { machine_id, .. }
            | Self::MachineAdded { machine_id, .. }
            | Self::MachineRemoved { machine_id, .. }
            | Self::ConfigurationUpdated { machine_id, .. } => machine_id,
        }
    }

    /// When the event happened.
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            Self::StateChanged { time, .. }
            | Self::MachineAdded { time, .. }
            | Self::MachineRemoved { time, .. }
            | Self::ConfigurationUpdated { time, .. } => *time,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::MachineAdded { .. } => "machine_added",
            Self::MachineRemoved { .. } => "machine_removed",
            Self::ConfigurationUpdated { .. } => "configuration_updated",
        }
    }
}
