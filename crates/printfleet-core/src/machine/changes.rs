//! Deltas of a [`MachineState`] between two acknowledged snapshots.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use super::capabilities::MachineCapabilities;
use super::message::MachineMessage;
use super::state::{AirDuctMode, HistoricJob, MachineState, MaterialUnit, PrintJob};
use super::status::MachineStatus;
use crate::tracked::{
    ListChanges, ListTracker, MapChanges, MapTracker, ScalarChange, SetChanges, SetTracker, Tracked,
    ValueTracker,
};

/// Per-field deltas. Unchanged fields are `None` and omitted on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineStateChanges {
    /// Connection flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_connected: Option<ScalarChange<bool>>,
    /// Activity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ScalarChange<MachineStatus>>,
    /// Capability set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ScalarChange<MachineCapabilities>>,
    /// Current job.
    #[serde(rename = "Job", skip_serializing_if = "Option::is_none")]
    pub current_job: Option<ScalarChange<Option<PrintJob>>>,
    /// Finished jobs added or removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_history: Option<ListChanges<HistoricJob>>,
    /// Material units by id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_units: Option<MapChanges<String, MaterialUnit>>,
    /// Names of lights that turned on or off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lights_on: Option<SetChanges<String>>,
    /// Fan speeds by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fans: Option<MapChanges<String, u8>>,
    /// Air duct mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_duct_mode: Option<ScalarChange<Option<AirDuctMode>>>,
    /// Messages by signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<MapChanges<String, MachineMessage>>,
}

impl MachineStateChanges {
    /// Whether no field changed.
    pub fn is_empty(&self) -> bool {
        self.is_connected.is_none()
            && self.status.is_none()
            && self.capabilities.is_none()
            && self.current_job.is_none()
            && self.job_history.is_none()
            && self.material_units.is_none()
            && self.lights_on.is_none()
            && self.fans.is_none()
            && self.air_duct_mode.is_none()
            && self.messages.is_none()
    }
}

/// The subset of [`MachineStateChanges`] shown in overview listings.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AtAGlanceChanges {
    /// Activity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ScalarChange<MachineStatus>>,
    /// Capability set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ScalarChange<MachineCapabilities>>,
    /// Current job.
    #[serde(rename = "Job", skip_serializing_if = "Option::is_none")]
    pub current_job: Option<ScalarChange<Option<PrintJob>>>,
}

impl AtAGlanceChanges {
    /// Project `changes`, or `None` when none of the overview fields changed.
    pub fn of(changes: &MachineStateChanges) -> Option<Self> {
        if changes.status.is_none() && changes.capabilities.is_none() && changes.current_job.is_none() {
            return None;
        }
        Some(Self {
            status: changes.status.clone(),
            capabilities: changes.capabilities.clone(),
            current_job: changes.current_job.clone(),
        })
    }
}

/// One tracker per observable field of a shared [`MachineState`].
pub struct StateTracker {
    is_connected: ValueTracker<bool>,
    status: ValueTracker<MachineStatus>,
    capabilities: ValueTracker<MachineCapabilities>,
    current_job: ValueTracker<Option<PrintJob>>,
    job_history: ListTracker<HistoricJob>,
    material_units: MapTracker<String, MaterialUnit>,
    lights_on: SetTracker<String>,
    fans: MapTracker<String, u8>,
    air_duct_mode: ValueTracker<Option<AirDuctMode>>,
    messages: MapTracker<String, MachineMessage>,
}

fn read<T>(
    state: &Arc<RwLock<MachineState>>,
    project: impl Fn(&MachineState) -> T + Send + Sync + 'static,
) -> impl Fn() -> T + Send + Sync + 'static {
    let state = Arc::clone(state);
    move || project(&state.read())
}

impl StateTracker {
    /// Track `state`, acknowledging its current contents.
    pub fn new(state: &Arc<RwLock<MachineState>>) -> Self {
        Self {
            is_connected: ValueTracker::new(read(state, |s| s.is_connected)),
            status: ValueTracker::new(read(state, |s| s.status)),
            capabilities: ValueTracker::new(read(state, |s| s.capabilities)),
            current_job: ValueTracker::new(read(state, |s| s.current_job.clone())),
            job_history: ListTracker::new(read(state, |s| s.job_history.clone())),
            material_units: MapTracker::new(read(state, |s| s.material_units.clone())),
            lights_on: SetTracker::new(read(state, MachineState::lights_on)),
            fans: MapTracker::new(read(state, |s| s.fans.clone())),
            air_duct_mode: ValueTracker::new(read(state, |s| s.air_duct_mode)),
            messages: MapTracker::new(read(state, |s| s.messages.clone())),
        }
    }

    /// Collect the deltas of every changed field. With `mark_as_seen` the
    /// observed values become the new baseline.
    pub fn take_changes(&mut self, mark_as_seen: bool) -> MachineStateChanges {
        MachineStateChanges {
            is_connected: self.is_connected.try_use(mark_as_seen),
            status: self.status.try_use(mark_as_seen),
            capabilities: self.capabilities.try_use(mark_as_seen),
            current_job: self.current_job.try_use(mark_as_seen),
            job_history: self.job_history.try_use(mark_as_seen),
            material_units: self.material_units.try_use(mark_as_seen),
            lights_on: self.lights_on.try_use(mark_as_seen),
            fans: self.fans.try_use(mark_as_seen),
            air_duct_mode: self.air_duct_mode.try_use(mark_as_seen),
            messages: self.messages.try_use(mark_as_seen),
        }
    }

    /// Acknowledge everything without computing deltas.
    pub fn view(&mut self) {
        self.is_connected.view();
        self.status.view();
        self.capabilities.view();
        self.current_job.view();
        self.job_history.view();
        self.material_units.view();
        self.lights_on.view();
        self.fans.view();
        self.air_duct_mode.view();
        self.messages.view();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MachineId;
    use crate::machine::catalog;
    use crate::machine::state::{MachineIdentity, StateUpdate};

    fn shared() -> Arc<RwLock<MachineState>> {
        Arc::new(RwLock::new(MachineState::new(MachineId::from("m1"), MachineIdentity::default())))
    }

    fn commit(state: &Arc<RwLock<MachineState>>, update: StateUpdate) {
        let mut guard = state.write();
        *guard = guard.clone().reduce(update);
    }

    #[test]
    fn no_mutation_no_changes() {
        let state = shared();
        let mut tracker = StateTracker::new(&state);
        assert!(tracker.take_changes(true).is_empty());
    }

    #[test]
    fn connect_reports_flag_and_status() {
        let state = shared();
        let mut tracker = StateTracker::new(&state);
        commit(&state, StateUpdate::Connected(true));

        let changes = tracker.take_changes(true);
        assert_eq!(changes.is_connected, Some(ScalarChange { previous: false, current: true }));
        assert_eq!(
            changes.status,
            Some(ScalarChange {
                previous: MachineStatus::Disconnected,
                current: MachineStatus::Unknown,
            })
        );
        assert!(changes.messages.is_none());
        assert!(tracker.take_changes(true).is_empty());
    }

    #[test]
    fn unacknowledged_changes_accumulate() {
        let state = shared();
        let mut tracker = StateTracker::new(&state);
        commit(&state, StateUpdate::Light { name: "a".into(), on: true });
        let _ = tracker.take_changes(false);
        commit(&state, StateUpdate::Light { name: "b".into(), on: true });

        let lights = tracker.take_changes(true).lights_on.unwrap();
        assert_eq!(lights.inserted.len(), 2);
    }

    #[test]
    fn message_changes_are_keyed_by_signature() {
        let state = shared();
        let mut tracker = StateTracker::new(&state);
        let msg = catalog::failed_to_connect();
        let sig = msg.signature();
        commit(&state, StateUpdate::RaiseMessage(msg));

        let changes = tracker.take_changes(true).messages.unwrap();
        assert!(changes.inserted.contains_key(&sig));
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn at_a_glance_requires_overview_field() {
        let lights_only = MachineStateChanges {
            lights_on: Some(crate::tracked::diff_sets(
                &std::collections::BTreeSet::new(),
                &std::collections::BTreeSet::from(["x".to_string()]),
            )),
            ..Default::default()
        };
        assert!(AtAGlanceChanges::of(&lights_only).is_none());

        let status = MachineStateChanges {
            status: Some(ScalarChange {
                previous: MachineStatus::Idle,
                current: MachineStatus::Printing,
            }),
            ..Default::default()
        };
        let glance = AtAGlanceChanges::of(&status).unwrap();
        assert_eq!(glance.status.unwrap().current, MachineStatus::Printing);
    }

    #[test]
    fn empty_fields_are_omitted_on_the_wire() {
        let changes = MachineStateChanges {
            is_connected: Some(ScalarChange { previous: false, current: true }),
            ..Default::default()
        };
        let json = serde_json::to_value(&changes).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"IsConnected": {"Previous": false, "Current": true}})
        );
    }
}
