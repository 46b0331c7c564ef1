//! Machine state value and its reducer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capabilities::MachineCapabilities;
use super::file::FileHandle;
use super::message::MachineMessage;
use super::status::MachineStatus;
use crate::ids::MachineId;

/// Number of finished jobs kept in [`MachineState::job_history`].
pub const JOB_HISTORY_LIMIT: usize = 100;

/// Descriptive identity of a machine. Fixed at creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineIdentity {
    /// Operator-assigned name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Manufacturer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    /// Model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Chamber air duct mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AirDuctMode {
    /// Cooling.
    Cooling,
    /// Heating.
    Heating,
}

/// The job currently on the machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrintJob {
    /// Job name as reported by the machine.
    pub name: String,
    /// Machine-specific stage label, e.g. heating or printing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// 0 to 100.
    pub percentage_complete: u8,
    /// Estimated seconds left.
    pub remaining_secs: u64,
    /// Estimated total duration.
    pub total_secs: u64,
    /// The job file, when cached locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileHandle>,
    /// Preview image, when cached locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<FileHandle>,
}

impl PrintJob {
    /// A job that just started.
    pub fn new(name: impl Into<String>, total_secs: u64) -> Self {
        Self {
            name: name.into(),
            stage: None,
            percentage_complete: 0,
            remaining_secs: total_secs,
            total_secs,
            file: None,
            thumbnail: None,
        }
    }
}

/// A finished job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoricJob {
    /// Job name.
    pub name: String,
    /// Whether the job finished rather than failed or was stopped.
    pub is_success: bool,
    /// When the job ended.
    pub ended_at: DateTime<Utc>,
    /// Seconds the job ran.
    pub elapsed_secs: u64,
    /// The job file, when cached locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileHandle>,
}

/// Material loaded in one tray of a material unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MaterialTray {
    /// Material family, e.g. PLA or PETG.
    pub name: String,
    /// `#RRGGBB`.
    pub color: String,
    /// Slicer filament profile id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
}

/// A material feeder (spool holder, multi-material unit).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MaterialUnit {
    /// Unit id, unique per machine.
    #[serde(rename = "ID")]
    pub id: String,
    /// Number of tray slots.
    pub capacity: u32,
    /// Unit model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Loaded trays by slot.
    #[serde(default)]
    pub loaded: BTreeMap<u32, MaterialTray>,
    /// Relative humidity inside the unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_percent: Option<f64>,
    /// Temperature inside the unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
}

/// One mutation of a [`MachineState`].
#[derive(Clone, Debug, PartialEq)]
pub enum StateUpdate {
    /// Connection flag. Disconnecting forces `Disconnected` status.
    Connected(bool),
    /// Current activity.
    Status(MachineStatus),
    /// Replace the capability set.
    Capabilities(MachineCapabilities),
    /// Replace or clear the current job.
    Job(Option<PrintJob>),
    /// Progress of the current job. Ignored without a job.
    JobProgress {
        /// 0 to 100.
        percentage_complete: u8,
        /// Estimated seconds left.
        remaining_secs: u64,
        /// Stage label.
        stage: Option<String>,
    },
    /// Insert or replace a material unit by id.
    MaterialUnit(MaterialUnit),
    /// Remove a material unit by id.
    RemoveMaterialUnit(String),
    /// Switch a light.
    Light {
        /// Light name.
        name: String,
        /// On or off.
        on: bool,
    },
    /// Set a fan speed.
    Fan {
        /// Fan name.
        name: String,
        /// 0 to 100.
        speed_percent: u8,
    },
    /// Set or clear the air duct mode.
    AirDuct(Option<AirDuctMode>),
    /// Attach a message. A message with the same signature is kept as is.
    RaiseMessage(MachineMessage),
    /// Remove a message by signature.
    ResolveMessage(String),
    /// Remove every message.
    ClearMessages,
    /// Forget finished jobs.
    ClearJobHistory,
    /// Apply updates in order.
    Batch(Vec<StateUpdate>),
}

/// Full state of one machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineState {
    /// Machine id.
    #[serde(rename = "ID")]
    pub id: MachineId,
    /// Nickname, brand and model.
    #[serde(flatten)]
    pub identity: MachineIdentity,
    /// Whether the device link is up.
    pub is_connected: bool,
    /// Current activity.
    pub status: MachineStatus,
    /// What the machine supports.
    pub capabilities: MachineCapabilities,
    /// The running or paused job.
    #[serde(rename = "Job", default, skip_serializing_if = "Option::is_none")]
    pub current_job: Option<PrintJob>,
    /// Oldest first, at most [`JOB_HISTORY_LIMIT`].
    #[serde(default)]
    pub job_history: Vec<HistoricJob>,
    /// Material units by id.
    #[serde(default)]
    pub material_units: BTreeMap<String, MaterialUnit>,
    /// Light name to on/off.
    #[serde(default)]
    pub lights: BTreeMap<String, bool>,
    /// Fan name to speed percent.
    #[serde(default)]
    pub fans: BTreeMap<String, u8>,
    /// Air duct mode, when the machine has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_duct_mode: Option<AirDuctMode>,
    /// Outstanding messages by signature.
    #[serde(default)]
    pub messages: BTreeMap<String, MachineMessage>,
}

impl MachineState {
    /// A disconnected machine with nothing reported yet.
    pub fn new(id: MachineId, identity: MachineIdentity) -> Self {
        Self {
            id,
            identity,
            is_connected: false,
            status: MachineStatus::Disconnected,
            capabilities: MachineCapabilities::NONE,
            current_job: None,
            job_history: Vec::new(),
            material_units: BTreeMap::new(),
            lights: BTreeMap::new(),
            fans: BTreeMap::new(),
            air_duct_mode: None,
            messages: BTreeMap::new(),
        }
    }

    /// Apply `update` and drop messages whose auto-resolve condition now holds.
    #[must_use]
    pub fn reduce(mut self, update: StateUpdate) -> Self {
        self.apply(update);
        self.resolve_satisfied_messages();
        self
    }

    /// Names of the lights that are on.
    pub fn lights_on(&self) -> BTreeSet<String> {
        self.lights
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether a message with `title` is outstanding.
    pub fn has_message_titled(&self, title: &str) -> bool {
        self.messages.values().any(|m| m.title == title)
    }

    fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::Connected(connected) => {
                self.is_connected = connected;
                if !connected {
                    self.status = MachineStatus::Disconnected;
                } else if self.status == MachineStatus::Disconnected {
                    self.status = MachineStatus::Unknown;
                }
            }
            StateUpdate::Status(status) => self.set_status(status),
            StateUpdate::Capabilities(caps) => self.capabilities = caps,
            StateUpdate::Job(job) => self.current_job = job,
            StateUpdate::JobProgress {
                percentage_complete,
                remaining_secs,
                stage,
            } => {
                if let Some(job) = self.current_job.as_mut() {
                    job.percentage_complete = percentage_complete.min(100);
                    job.remaining_secs = remaining_secs;
                    job.stage = stage;
                }
            }
            StateUpdate::MaterialUnit(unit) => {
                let _ = self.material_units.insert(unit.id.clone(), unit);
            }
            StateUpdate::RemoveMaterialUnit(id) => {
                let _ = self.material_units.remove(&id);
            }
            StateUpdate::Light { name, on } => {
                let _ = self.lights.insert(name, on);
            }
            StateUpdate::Fan { name, speed_percent } => {
                let _ = self.fans.insert(name, speed_percent.min(100));
            }
            StateUpdate::AirDuct(mode) => self.air_duct_mode = mode,
            StateUpdate::RaiseMessage(message) => {
                let _ = self.messages.entry(message.signature()).or_insert(message);
            }
            StateUpdate::ResolveMessage(signature) => {
                let _ = self.messages.remove(&signature);
            }
            StateUpdate::ClearMessages => self.messages.clear(),
            StateUpdate::ClearJobHistory => self.job_history.clear(),
            StateUpdate::Batch(updates) => {
                for update in updates {
                    self.apply(update);
                }
            }
        }
    }

    fn set_status(&mut self, status: MachineStatus) {
        let previous = self.status;
        self.status = status;

        if previous.is_active() && status.is_finished() {
            if let Some(job) = self.current_job.as_ref() {
                self.job_history.push(HistoricJob {
                    name: job.name.clone(),
                    is_success: status == MachineStatus::Printed,
                    ended_at: Utc::now(),
                    elapsed_secs: job.total_secs.saturating_sub(job.remaining_secs),
                    file: job.file.clone(),
                });
                if self.job_history.len() > JOB_HISTORY_LIMIT {
                    let excess = self.job_history.len() - JOB_HISTORY_LIMIT;
                    let _ = self.job_history.drain(..excess);
                }
            }
        }

        if previous.is_finished() && status == MachineStatus::Idle {
            self.current_job = None;
        }
    }

    fn resolve_satisfied_messages(&mut self) {
        let snapshot = self.clone();
        self.messages
            .retain(|_, message| !message.auto_resolve.is_satisfied_by(&snapshot));
    }
}

/// Compact view of a machine for overview listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AtAGlanceState {
    /// Current activity.
    pub status: MachineStatus,
    /// What the machine supports.
    pub capabilities: MachineCapabilities,
    /// Operator-assigned name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// The current job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<PrintJob>,
}

impl From<&MachineState> for AtAGlanceState {
    fn from(state: &MachineState) -> Self {
        Self {
            status: state.status,
            capabilities: state.capabilities,
            nickname: state.identity.nickname.clone(),
            job: state.current_job.clone(),
        }
    }
}
