//! Machine status.

use serde::{Deserialize, Serialize};

/// Operational status reported for a machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MachineStatus {
    /// No live connection.
    #[default]
    Disconnected,
    /// Connected, status not yet reported.
    Unknown,
    /// Ready for a job.
    Idle,
    /// Job in progress.
    Printing,
    /// Job finished; the bed has not been cleared yet.
    Printed,
    /// Job paused.
    Paused,
    /// Job stopped before completion.
    Canceled,
}

impl MachineStatus {
    /// A job is underway (printing or paused).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Printing | Self::Paused)
    }

    /// A job has ended and awaits bed clearing.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Printed | Self::Canceled)
    }
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Unknown => "Unknown",
            Self::Idle => "Idle",
            Self::Printing => "Printing",
            Self::Printed => "Printed",
            Self::Paused => "Paused",
            Self::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}
