//! Machine actions: listing, state subscriptions, job control, and
//! configuration retrieval.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use printfleet_core::MachineId;
use printfleet_core::machine::{AtAGlanceState, MachineState};
use printfleet_machines::DeviceConnection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    ClientState, FleetContext, MACHINE_CONFIGURATION_ALL, MACHINE_LIST, MACHINE_MARK_AS_IDLE, MACHINE_PAUSE,
    MACHINE_RESUME, MACHINE_STOP, MACHINE_SUBSCRIBE, MACHINE_UNSUBSCRIBE, StateDetail,
};
use crate::dispatch::{ActionRegistry, ActionResponse, ActionResult, DispatchError, Reply};
use crate::websocket::Session;

/// A payload naming one machine.
pub trait MachineSpecific {
    /// The machine.
    fn machine_id(&self) -> &MachineId;
}

/// Payload of the machine operation actions.
#[derive(Debug, Deserialize)]
pub struct MachinePayload {
    /// Target machine.
    #[serde(rename = "MachineID")]
    pub machine_id: MachineId,
}

impl MachineSpecific for MachinePayload {
    fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }
}

/// Payload of `machine/subscribe`.
#[derive(Debug, Deserialize)]
pub struct SubscribeToMachine {
    /// Target machine.
    #[serde(rename = "MachineID")]
    pub machine_id: MachineId,
    /// Requested detail level.
    #[serde(rename = "DetailOfState")]
    pub detail: StateDetail,
}

impl MachineSpecific for SubscribeToMachine {
    fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }
}

/// Snapshot matching the requested detail level.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscribeResult {
    /// Full snapshot, for `Full`.
    pub full_state: Option<MachineState>,
    /// Overview snapshot, for `AtAGlance`.
    pub at_a_glance_state: Option<AtAGlanceState>,
}

impl ActionResult for SubscribeResult {
    fn is_success(&self) -> bool {
        true
    }
}

/// One row of `machine/list`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineListing {
    /// Machine id.
    #[serde(rename = "ID")]
    pub id: MachineId,
    /// Connector type.
    pub discrimination: String,
    /// Whether the link is up.
    pub is_connected: bool,
    /// Overview of the state.
    pub at_a_glance_state: AtAGlanceState,
}

/// Reply of `machine/list`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineList {
    /// Machines ordered by id.
    pub machines: Vec<MachineListing>,
}

impl ActionResult for MachineList {
    fn is_success(&self) -> bool {
        true
    }
}

/// Reply of `machine/configuration/all`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Configurations {
    /// Adapter configuration by machine id.
    pub configurations: BTreeMap<MachineId, Value>,
}

impl ActionResult for Configurations {
    fn is_success(&self) -> bool {
        true
    }
}

/// Register a payload action resolving its machine first. An unknown
/// machine fails the action without calling `handler`.
pub fn map_machine_action<P, F, Fut, R>(
    actions: &mut ActionRegistry<ClientState>,
    ctx: &FleetContext,
    name: &str,
    handler: F,
) -> bool
where
    P: MachineSpecific + DeserializeOwned + Send + 'static,
    F: Fn(Arc<Session<ClientState>>, P, Arc<DeviceConnection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, DispatchError>> + Send + 'static,
    R: ActionResult,
{
    let machines = Arc::clone(&ctx.machines);
    actions.map_action_with(name, move |session, payload: P| {
        let fut = match machines.get(payload.machine_id()) {
            Some(machine) => Ok(handler(session, payload, machine)),
            None => Err(format!("Could not find Machine with ID {}", payload.machine_id())),
        };
        async move {
            match fut {
                Ok(fut) => Ok(Reply::Done(fut.await?)),
                Err(reason) => Ok(Reply::failure(reason)),
            }
        }
    })
}

fn subscribe(state: &ClientState, payload: SubscribeToMachine, machine: &DeviceConnection) -> SubscribeResult {
    debug!(machine_id = %payload.machine_id, detail = ?payload.detail, "machine subscription");
    let detail = payload.detail;
    state.subscribe(payload.machine_id, detail);
    match detail {
        StateDetail::Full => SubscribeResult {
            full_state: Some(machine.state()),
            at_a_glance_state: None,
        },
        StateDetail::AtAGlance => SubscribeResult {
            full_state: None,
            at_a_glance_state: Some(machine.at_a_glance()),
        },
        StateDetail::None => SubscribeResult {
            full_state: None,
            at_a_glance_state: None,
        },
    }
}

pub(super) fn register(actions: &mut ActionRegistry<ClientState>, ctx: &FleetContext) -> usize {
    let mut registered = 0;

    let machines = Arc::clone(&ctx.machines);
    registered += usize::from(actions.map_action(MACHINE_LIST, move |_| {
        let machines = machines
            .snapshot()
            .into_iter()
            .map(|machine| {
                let state = machine.state();
                MachineListing {
                    id: machine.id().clone(),
                    discrimination: machine.discriminator().to_owned(),
                    is_connected: state.is_connected,
                    at_a_glance_state: AtAGlanceState::from(&state),
                }
            })
            .collect();
        async move { Ok(MachineList { machines }) }
    }));

    registered += usize::from(map_machine_action(
        actions,
        ctx,
        MACHINE_SUBSCRIBE,
        |session, payload: SubscribeToMachine, machine| {
            let result = subscribe(session.state(), payload, &machine);
            async move { Ok(result) }
        },
    ));

    registered += usize::from(map_machine_action(
        actions,
        ctx,
        MACHINE_UNSUBSCRIBE,
        |session, payload: MachinePayload, _| {
            let _ = session.state().unsubscribe(&payload.machine_id);
            async { Ok(ActionResponse::success()) }
        },
    ));

    registered += usize::from(map_machine_action(
        actions,
        ctx,
        MACHINE_PAUSE,
        |_, _: MachinePayload, machine| async move { Ok(machine.pause().await) },
    ));
    registered += usize::from(map_machine_action(
        actions,
        ctx,
        MACHINE_RESUME,
        |_, _: MachinePayload, machine| async move { Ok(machine.resume().await) },
    ));
    registered += usize::from(map_machine_action(
        actions,
        ctx,
        MACHINE_STOP,
        |_, _: MachinePayload, machine| async move { Ok(machine.stop().await) },
    ));
    registered += usize::from(map_machine_action(
        actions,
        ctx,
        MACHINE_MARK_AS_IDLE,
        |_, _: MachinePayload, machine| async move { Ok(machine.mark_as_idle().await) },
    ));

    let machines = Arc::clone(&ctx.machines);
    registered += usize::from(actions.map_action(MACHINE_CONFIGURATION_ALL, move |_| {
        let machines = Arc::clone(&machines);
        async move {
            let configurations = machines
                .configurations()
                .await
                .into_iter()
                .map(|stored| (stored.id, stored.configuration))
                .collect();
            Ok(Configurations { configurations })
        }
    }));

    registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::register_all;
    use crate::dispatch::RequestEnvelope;
    use printfleet_core::{BroadcastHub, SessionId};
    use printfleet_machines::{ConnectionRegistry, MemoryConfigurationStore, SimulatedFactory, StoredConfiguration};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Fixture {
        actions: ActionRegistry<ClientState>,
        session: Arc<Session<ClientState>>,
        _rx: mpsc::Receiver<Arc<str>>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryConfigurationStore::with_configurations(vec![StoredConfiguration::new(
            MachineId::from("m1"),
            "simulated",
            json!({"Nickname": "Bench"}),
        )]));
        let machines = ConnectionRegistry::new(store, Arc::new(BroadcastHub::new(64)));
        assert!(machines.register_factory(Arc::new(SimulatedFactory::new())));
        let machines = Arc::new(machines);
        assert_eq!(machines.load_from_store().await.unwrap(), 1);
        let machine = machines.get("m1").unwrap();
        assert!(machine.connect().await.is_success);

        let ctx = FleetContext::new(machines, Arc::new(BroadcastHub::new(64)));
        let mut actions = ActionRegistry::new();
        assert!(register_all(&mut actions, &ctx) > 0);
        let (tx, rx) = mpsc::channel(16);
        Fixture {
            actions,
            session: Arc::new(Session::new(SessionId::new(), tx, ClientState::default())),
            _rx: rx,
        }
    }

    async fn call(fixture: &Fixture, action: &str, data: Option<Value>) -> Value {
        let request = RequestEnvelope {
            action: action.into(),
            data,
            response_message_id: None,
        };
        fixture
            .actions
            .dispatch(&fixture.session, request)
            .await
            .unwrap()
            .data
    }

    #[tokio::test]
    async fn unknown_machine_fails() {
        let fixture = fixture().await;
        let data = call(&fixture, MACHINE_PAUSE, Some(json!({"MachineID": "ghost"}))).await;
        assert_eq!(data["IsSuccess"], false);
        assert_eq!(data["FailureReason"], "Could not find Machine with ID ghost");
    }

    #[tokio::test]
    async fn subscribe_returns_requested_detail() {
        let fixture = fixture().await;
        let full = call(
            &fixture,
            MACHINE_SUBSCRIBE,
            Some(json!({"MachineID": "m1", "DetailOfState": "Full"})),
        )
        .await;
        assert_eq!(full["IsSuccess"], true);
        assert_eq!(full["FullState"]["ID"], "m1");
        assert!(full["AtAGlanceState"].is_null());

        let glance = call(
            &fixture,
            MACHINE_SUBSCRIBE,
            Some(json!({"MachineID": "m1", "DetailOfState": "AtAGlance"})),
        )
        .await;
        assert!(glance["FullState"].is_null());
        assert_eq!(glance["AtAGlanceState"]["Nickname"], "Bench");
        assert_eq!(
            fixture.session.state().subscription(&MachineId::from("m1")),
            Some(StateDetail::AtAGlance)
        );

        let _ = call(&fixture, MACHINE_UNSUBSCRIBE, Some(json!({"MachineID": "m1"}))).await;
        assert_eq!(fixture.session.state().subscription_count(), 0);
    }

    #[tokio::test]
    async fn idle_machine_cannot_be_marked_idle() {
        let fixture = fixture().await;
        let data = call(&fixture, MACHINE_MARK_AS_IDLE, Some(json!({"MachineID": "m1"}))).await;
        assert_eq!(data["IsSuccess"], false);
        assert!(data["FailureReason"].as_str().unwrap().contains("Printed or Canceled"));
    }

    #[tokio::test]
    async fn list_and_configurations() {
        let fixture = fixture().await;
        let list = call(&fixture, MACHINE_LIST, None).await;
        assert_eq!(list["Machines"][0]["ID"], "m1");
        assert_eq!(list["Machines"][0]["Discrimination"], "simulated");
        assert_eq!(list["Machines"][0]["IsConnected"], true);

        let all = call(&fixture, MACHINE_CONFIGURATION_ALL, None).await;
        assert_eq!(all["Configurations"]["m1"]["Nickname"], "Bench");
    }
}
