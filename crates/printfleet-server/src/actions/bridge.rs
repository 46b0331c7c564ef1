//! Pushes fleet events to subscribed sessions.

use std::sync::Arc;

use printfleet_core::machine::{AtAGlanceChanges, MachineStateChanges};
use printfleet_core::{MachineId, Subscription};
use printfleet_machines::{ConnectionRegistry, FleetEvent};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{ClientState, StateDetail, configuration_topic, state_topic};
use crate::dispatch::ResponseEnvelope;
use crate::websocket::{Session, SessionRegistry};

/// Default queue capacity of the bridge's fleet hub subscription.
pub const BRIDGE_QUEUE_CAPACITY: usize = 1024;

/// `Data` of a `machine/{id}/state` push. Exactly one side is set.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatePush<'a> {
    /// Every changed field, for `Full` subscribers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_changes: Option<&'a MachineStateChanges>,
    /// Overview fields, for `AtAGlance` subscribers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_a_glance_changes: Option<AtAGlanceChanges>,
}

/// `Data` of a `machine/{id}/configuration` push.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigurationPush<'a> {
    /// Reconfigured machine.
    #[serde(rename = "MachineID")]
    pub machine_id: &'a MachineId,
    /// New adapter configuration.
    pub configuration: &'a Value,
}

/// Routes [`FleetEvent`]s to the sessions subscribed to their machine.
pub struct StateBridge {
    events: Subscription<FleetEvent>,
    sessions: Arc<SessionRegistry<ClientState>>,
}

impl StateBridge {
    /// Bridge `events` to the sessions in `sessions`.
    pub fn new(events: Subscription<FleetEvent>, sessions: Arc<SessionRegistry<ClientState>>) -> Self {
        Self { events, sessions }
    }

    /// Run until `cancel` fires or the hub closes the subscription.
    #[instrument(skip_all, name = "state_bridge")]
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = self.events.recv() => event,
            };
            let Some(event) = event else { break };
            debug!(kind = event.kind(), machine_id = %event.machine_id(), "bridging fleet event");
            self.route(&event);
        }
        info!(dropped = self.events.dropped(), "state bridge stopped");
    }

    fn subscribers(&self, machine_id: &MachineId) -> Vec<(Arc<Session<ClientState>>, StateDetail)> {
        self.sessions
            .snapshot()
            .into_iter()
            .filter_map(|session| {
                let detail = session.state().subscription(machine_id)?;
                Some((session, detail))
            })
            .collect()
    }

    /// Push one event. Returns how many sessions accepted a message.
    pub fn route(&self, event: &FleetEvent) -> usize {
        match event {
            FleetEvent::StateChanged {
                machine_id,
                changes,
                time,
            } => {
                let subscribers = self.subscribers(machine_id);
                let targets = |wanted: StateDetail| -> Vec<Arc<Session<ClientState>>> {
                    subscribers
                        .iter()
                        .filter(|(_, detail)| *detail == wanted)
                        .map(|(session, _)| Arc::clone(session))
                        .collect()
                };
                let topic = state_topic(machine_id);
                let mut delivered = 0;

                let full = targets(StateDetail::Full);
                if !full.is_empty() {
                    let mut envelope = ResponseEnvelope::new(
                        topic.clone(),
                        StatePush {
                            full_changes: Some(changes.as_ref()),
                            at_a_glance_changes: None,
                        },
                    );
                    envelope.time = *time;
                    delivered += self.sessions.broadcast(&envelope, &full);
                }

                let glance = targets(StateDetail::AtAGlance);
                if let Some(changes) = AtAGlanceChanges::of(changes).filter(|_| !glance.is_empty()) {
                    let mut envelope = ResponseEnvelope::new(
                        topic,
                        StatePush {
                            full_changes: None,
                            at_a_glance_changes: Some(changes),
                        },
                    );
                    envelope.time = *time;
                    delivered += self.sessions.broadcast(&envelope, &glance);
                }
                delivered
            }
            FleetEvent::ConfigurationUpdated {
                machine_id,
                configuration,
                time,
            } => {
                let targets: Vec<_> = self
                    .subscribers(machine_id)
                    .into_iter()
                    .map(|(session, _)| session)
                    .collect();
                let mut envelope = ResponseEnvelope::new(
                    configuration_topic(machine_id),
                    ConfigurationPush {
                        machine_id,
                        configuration,
                    },
                );
                envelope.time = *time;
                self.sessions.broadcast(&envelope, &targets)
            }
            FleetEvent::MachineRemoved { machine_id, .. } => {
                for session in self.sessions.snapshot() {
                    let _ = session.state().unsubscribe(machine_id);
                }
                0
            }
            FleetEvent::MachineAdded { .. } => 0,
        }
    }
}

/// Start the bridge on `machines`' event hub, subscribed with a queue of
/// `queue_capacity` events.
pub fn spawn_state_bridge(
    machines: &ConnectionRegistry,
    sessions: Arc<SessionRegistry<ClientState>>,
    queue_capacity: usize,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let bridge = StateBridge::new(machines.subscribe(queue_capacity), sessions);
    tokio::spawn(bridge.run(cancel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use printfleet_core::machine::MachineStatus;
    use printfleet_core::tracked::ScalarChange;
    use printfleet_core::{BroadcastHub, SessionId};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn session(sessions: &SessionRegistry<ClientState>) -> (Arc<Session<ClientState>>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(16);
        let session = Arc::new(Session::new(SessionId::new(), tx, ClientState::default()));
        sessions.insert(Arc::clone(&session));
        (session, rx)
    }

    fn bridge() -> (StateBridge, Arc<SessionRegistry<ClientState>>) {
        let hub = BroadcastHub::new(16);
        let sessions = Arc::new(SessionRegistry::new());
        (StateBridge::new(hub.subscribe(16), Arc::clone(&sessions)), sessions)
    }

    fn state_changed(changes: MachineStateChanges) -> FleetEvent {
        FleetEvent::StateChanged {
            machine_id: MachineId::from("m1"),
            changes: Arc::new(changes),
            time: Utc::now(),
        }
    }

    fn next(rx: &mut mpsc::Receiver<Arc<str>>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn state_changes_follow_detail_level() {
        let (bridge, sessions) = bridge();
        let (full, mut full_rx) = session(&sessions);
        let (glance, mut glance_rx) = session(&sessions);
        let (_other, mut other_rx) = session(&sessions);
        full.state().subscribe(MachineId::from("m1"), StateDetail::Full);
        glance.state().subscribe(MachineId::from("m1"), StateDetail::AtAGlance);

        let status = MachineStateChanges {
            status: Some(ScalarChange {
                previous: MachineStatus::Idle,
                current: MachineStatus::Printing,
            }),
            ..MachineStateChanges::default()
        };
        assert_eq!(bridge.route(&state_changed(status)), 2);

        let pushed = next(&mut full_rx);
        assert_eq!(pushed["Topic"], "machine/m1/state");
        assert_eq!(pushed["Data"]["FullChanges"]["Status"]["Current"], "Printing");
        assert!(pushed["Data"].get("AtAGlanceChanges").is_none());

        let pushed = next(&mut glance_rx);
        assert_eq!(pushed["Data"]["AtAGlanceChanges"]["Status"]["Current"], "Printing");
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn at_a_glance_skips_detail_only_changes() {
        let (bridge, sessions) = bridge();
        let (glance, mut glance_rx) = session(&sessions);
        glance.state().subscribe(MachineId::from("m1"), StateDetail::AtAGlance);

        let connected = MachineStateChanges {
            is_connected: Some(ScalarChange {
                previous: false,
                current: true,
            }),
            ..MachineStateChanges::default()
        };
        assert_eq!(bridge.route(&state_changed(connected)), 0);
        assert!(glance_rx.try_recv().is_err());
    }

    #[test]
    fn configuration_reaches_every_subscriber() {
        let (bridge, sessions) = bridge();
        let (none, mut none_rx) = session(&sessions);
        none.state().subscribe(MachineId::from("m1"), StateDetail::None);

        let event = FleetEvent::ConfigurationUpdated {
            machine_id: MachineId::from("m1"),
            configuration: json!({"Nickname": "Left"}),
            time: Utc::now(),
        };
        assert_eq!(bridge.route(&event), 1);
        let pushed = next(&mut none_rx);
        assert_eq!(pushed["Topic"], "machine/m1/configuration");
        assert_eq!(pushed["Data"]["Configuration"]["Nickname"], "Left");
    }

    #[test]
    fn removal_drops_subscriptions() {
        let (bridge, sessions) = bridge();
        let (full, _rx) = session(&sessions);
        full.state().subscribe(MachineId::from("m1"), StateDetail::Full);
        let _ = bridge.route(&FleetEvent::MachineRemoved {
            machine_id: MachineId::from("m1"),
            time: Utc::now(),
        });
        assert_eq!(full.state().subscription_count(), 0);
    }
}
