//! Machine state model.
//!
//! [`MachineState`] is a plain value. Every mutation is expressed as a
//! [`StateUpdate`] and applied by the pure reducer [`MachineState::reduce`];
//! the owning connection publishes the result.

pub mod capabilities;
pub mod changes;
pub mod file;
pub mod message;
pub mod result;
pub mod state;
pub mod status;

pub use capabilities::MachineCapabilities;
pub use changes::{AtAGlanceChanges, MachineStateChanges, StateTracker};
pub use file::FileHandle;
pub use message::{AutoResolve, MachineMessage, MessageActions, MessageSeverity, MessageSource, catalog};
pub use result::MachineOperationResult;
pub use state::{
    AirDuctMode, AtAGlanceState, HistoricJob, MachineIdentity, MachineState, MaterialTray,
    MaterialUnit, PrintJob, StateUpdate,
};
pub use status::MachineStatus;
