//! Per-machine connection lifecycle.
//!
//! A [`DeviceConnection`] owns one vendor adapter and the machine's
//! [`MachineState`]. State only changes through [`StateCommitter::commit`],
//! which applies the pure reducer, diffs the result against the last
//! published snapshot, and publishes a [`FleetEvent::StateChanged`] when
//! something observable changed.
//!
//! Adapter failures (errors, panics, timeouts) never escape: connect
//! failures become a `FailedToConnect` message on the state, and operation
//! failures become a failed [`MachineOperationResult`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{FutureExt, TryStreamExt};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use printfleet_core::machine::{
    AirDuctMode, AtAGlanceState, FileHandle, MachineCapabilities, MachineIdentity, MachineMessage,
    MachineOperationResult, MachineState, MachineStatus, MessageSeverity, StateTracker, StateUpdate,
    catalog,
};
use printfleet_core::{BroadcastHub, MachineId};
use serde_json::Value;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{Connector, VendorAdapter};
use crate::errors::AdapterError;
use crate::events::FleetEvent;
use crate::files::FileStore;

/// Default connect attempt timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default wait for an operation's effect to be committed.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection tuning.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionOptions {
    /// Upper bound on one connect attempt.
    pub connect_timeout: Duration,
    /// Upper bound on one device operation.
    pub operation_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// Lifecycle of the link to the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link.
    Disconnected,
    /// A connect attempt is running.
    Connecting,
    /// Link is up.
    Connected,
}

struct Shared {
    id: MachineId,
    state: Arc<RwLock<MachineState>>,
    /// Held for the whole commit so deltas are published in commit order.
    tracker: Mutex<StateTracker>,
    link: Mutex<ConnectionState>,
    /// Set once another connection owns this machine id. Commits are
    /// ignored from then on.
    retired: AtomicBool,
    events: Arc<BroadcastHub<FleetEvent>>,
    commits: watch::Sender<u64>,
}

impl Shared {
    fn commit(&self, update: StateUpdate) -> bool {
        self.commit_linked(update, None)
    }

    /// Apply `update` and, when given, move the link to `link_to` inside the
    /// same critical section, so no other commit observes one without the
    /// other.
    fn commit_linked(&self, update: StateUpdate, link_to: Option<ConnectionState>) -> bool {
        let mut tracker = self.tracker.lock();
        if self.retired.load(Ordering::Acquire) {
            return false;
        }

        let still_connected = {
            let mut state = self.state.write();
            let next = state.clone().reduce(update);
            *state = next;
            state.is_connected
        };
        {
            let mut link = self.link.lock();
            match link_to {
                Some(next) => *link = next,
                None if !still_connected && *link == ConnectionState::Connected => {
                    *link = ConnectionState::Disconnected;
                }
                None => {}
            }
        }

        let changes = tracker.take_changes(true);
        if changes.is_empty() {
            return false;
        }

        self.events.publish(FleetEvent::StateChanged {
            machine_id: self.id.clone(),
            changes: Arc::new(changes),
            time: Utc::now(),
        });
        counter!("fleet_events_published_total", "kind" => "state_changed").increment(1);
        self.commits.send_modify(|n| *n = n.wrapping_add(1));
        true
    }
}

impl Shared {
    fn retire(&self) {
        let _tracker = self.tracker.lock();
        self.retired.store(true, Ordering::Release);
        *self.link.lock() = ConnectionState::Disconnected;
    }
}

/// Handle through which an adapter mutates machine state.
#[derive(Clone)]
pub struct StateCommitter {
    shared: Arc<Shared>,
}

impl StateCommitter {
    /// Apply `update`. Returns whether anything observable changed.
    pub fn commit(&self, update: StateUpdate) -> bool {
        self.shared.commit(update)
    }

    /// Machine this committer writes to.
    pub fn machine_id(&self) -> &MachineId {
        &self.shared.id
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> MachineState {
        self.shared.state.read().clone()
    }
}

impl std::fmt::Debug for StateCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCommitter").field("machine_id", &self.shared.id).finish()
    }
}

/// One machine of the fleet.
pub struct DeviceConnection {
    shared: Arc<Shared>,
    adapter: Arc<dyn VendorAdapter>,
    discriminator: String,
    /// One mutate-until operation at a time.
    operation_gate: Semaphore,
    /// Cancelled when the current link is torn down.
    link_cancel: Mutex<CancellationToken>,
    file_store: Option<Arc<dyn FileStore>>,
    options: ConnectionOptions,
}

impl DeviceConnection {
    /// Wrap `connector` as machine `id`. The connection starts disconnected.
    pub fn new(
        id: MachineId,
        discriminator: impl Into<String>,
        connector: Connector,
        events: Arc<BroadcastHub<FleetEvent>>,
        file_store: Option<Arc<dyn FileStore>>,
        options: ConnectionOptions,
    ) -> Self {
        let state = Arc::new(RwLock::new(MachineState::new(id.clone(), connector.identity)));
        let tracker = StateTracker::new(&state);
        let (commits, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                id,
                state,
                tracker: Mutex::new(tracker),
                link: Mutex::new(ConnectionState::Disconnected),
                retired: AtomicBool::new(false),
                events,
                commits,
            }),
            adapter: connector.adapter,
            discriminator: discriminator.into(),
            operation_gate: Semaphore::new(1),
            link_cancel: Mutex::new(CancellationToken::new()),
            file_store,
            options,
        }
    }

    /// Machine id.
    pub fn id(&self) -> &MachineId {
        &self.shared.id
    }

    /// Discriminator of the factory that built the adapter.
    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    /// Nickname, brand and model.
    pub fn identity(&self) -> MachineIdentity {
        self.shared.state.read().identity.clone()
    }

    /// Snapshot of the full state.
    pub fn state(&self) -> MachineState {
        self.shared.state.read().clone()
    }

    /// Overview projection of the current state.
    pub fn at_a_glance(&self) -> AtAGlanceState {
        AtAGlanceState::from(&*self.shared.state.read())
    }

    /// Current capability set.
    pub fn capabilities(&self) -> MachineCapabilities {
        self.shared.state.read().capabilities
    }

    /// Link state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.link.lock()
    }

    /// Committer bound to this connection.
    pub fn committer(&self) -> StateCommitter {
        StateCommitter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Apply `update` to the state.
    pub fn commit_state(&self, update: StateUpdate) -> bool {
        self.shared.commit(update)
    }

    /// Connect unless already connecting or connected.
    #[instrument(skip_all, fields(machine_id = %self.shared.id))]
    pub async fn connect(&self) -> MachineOperationResult {
        {
            let mut link = self.shared.link.lock();
            if *link != ConnectionState::Disconnected {
                debug!(state = ?*link, "connect skipped");
                return MachineOperationResult::ok();
            }
            *link = ConnectionState::Connecting;
        }
        counter!("machine_connect_attempts_total").increment(1);

        let cancel = {
            let mut token = self.link_cancel.lock();
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
            token.clone()
        };
        let committer = self.committer();
        let attempt = AssertUnwindSafe(self.adapter.connect(&committer, cancel)).catch_unwind();

        let failure = match tokio::time::timeout(self.options.connect_timeout, attempt).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(e.to_string()),
            Ok(Err(_)) => Some("adapter panicked".to_string()),
            Err(_) => Some(format!("timed out after {:?}", self.options.connect_timeout)),
        };

        match failure {
            None => {
                let _ = self
                    .shared
                    .commit_linked(StateUpdate::Connected(true), Some(ConnectionState::Connected));
                info!("machine connected");
                MachineOperationResult::ok()
            }
            Some(reason) => {
                self.link_cancel.lock().cancel();
                counter!("machine_connect_failures_total").increment(1);
                warn!(%reason, "machine connect failed");
                let message = catalog::failed_to_connect();
                let _ = self.shared.commit_linked(
                    StateUpdate::Batch(vec![
                        StateUpdate::Connected(false),
                        StateUpdate::RaiseMessage(message.clone()),
                    ]),
                    Some(ConnectionState::Disconnected),
                );
                MachineOperationResult::fail(message)
            }
        }
    }

    /// Connect only when disconnected.
    pub async fn connect_if_disconnected(&self) -> MachineOperationResult {
        if self.connection_state() == ConnectionState::Disconnected {
            self.connect().await
        } else {
            MachineOperationResult::ok()
        }
    }

    /// Tear down the link and ask the adapter to disconnect.
    #[instrument(skip_all, fields(machine_id = %self.shared.id))]
    pub async fn disconnect(&self) {
        self.link_cancel.lock().cancel();
        match AssertUnwindSafe(self.adapter.disconnect()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "adapter disconnect failed"),
            Err(_) => warn!("adapter panicked during disconnect"),
        }
        let _ = self
            .shared
            .commit_linked(StateUpdate::Connected(false), Some(ConnectionState::Disconnected));
        info!("machine disconnected");
    }

    /// Hand this machine id over to another connection. State stops
    /// changing and publishing at once; the adapter is disconnected in the
    /// background when a runtime is available.
    pub fn retire(self: &Arc<Self>) {
        self.shared.retire();
        self.link_cancel.lock().cancel();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let connection = Arc::clone(self);
                let _ = runtime.spawn(async move { connection.disconnect().await });
            }
            Err(_) => debug!(machine_id = %self.shared.id, "no runtime, adapter not disconnected"),
        }
    }

    /// Whether [`Self::retire`] was called.
    pub fn is_retired(&self) -> bool {
        self.shared.retired.load(Ordering::Acquire)
    }

    /// Pause the current job.
    pub async fn pause(&self) -> MachineOperationResult {
        self.mutate_until(
            MachineCapabilities::CONTROL,
            catalog::failed_to_pause(),
            self.adapter.pause(),
            |s| s.status == MachineStatus::Paused,
        )
        .await
    }

    /// Resume a paused job.
    pub async fn resume(&self) -> MachineOperationResult {
        self.mutate_until(
            MachineCapabilities::CONTROL,
            catalog::failed_to_resume(),
            self.adapter.resume(),
            |s| s.status == MachineStatus::Printing,
        )
        .await
    }

    /// Cancel the current job.
    pub async fn stop(&self) -> MachineOperationResult {
        self.mutate_until(
            MachineCapabilities::CONTROL,
            catalog::failed_to_stop(),
            self.adapter.stop(),
            |s| s.status == MachineStatus::Canceled,
        )
        .await
    }

    /// Confirm the bed was cleared after a finished or canceled job.
    pub async fn mark_as_idle(&self) -> MachineOperationResult {
        if !self.capabilities().contains(MachineCapabilities::CONTROL) {
            return MachineOperationResult::fail(catalog::unsupported_feature(MachineCapabilities::CONTROL));
        }
        let finished = self.shared.state.read().status.is_finished();
        if !finished {
            return MachineOperationResult::fail(MachineMessage::new(
                catalog::FAILED_TO_CLEAR_BED,
                "Machine must be Printed or Canceled.",
                MessageSeverity::Error,
            ));
        }
        self.mutate_until(
            MachineCapabilities::CONTROL,
            catalog::failed_to_clear_bed(),
            self.adapter.clear_bed(),
            |s| s.status == MachineStatus::Idle,
        )
        .await
    }

    /// Switch a light fixture.
    pub async fn set_light(&self, name: &str, on: bool) -> MachineOperationResult {
        self.mutate_until(
            MachineCapabilities::LIGHTING,
            catalog::failed_to_set_light(),
            self.adapter.set_light(name, on),
            |s| s.lights.get(name) == Some(&on),
        )
        .await
    }

    /// Switch the chamber air duct mode.
    pub async fn change_air_duct(&self, mode: AirDuctMode) -> MachineOperationResult {
        self.mutate_until(
            MachineCapabilities::AIR_DUCT,
            catalog::failed_to_change_air_duct(),
            self.adapter.change_air_duct(mode),
            |s| s.air_duct_mode == Some(mode),
        )
        .await
    }

    /// Invoke the adapter, then wait for a commit satisfying `done`.
    async fn mutate_until<F, P>(
        &self,
        required: MachineCapabilities,
        failure: MachineMessage,
        invoke: F,
        done: P,
    ) -> MachineOperationResult
    where
        F: Future<Output = Result<(), AdapterError>>,
        P: Fn(&MachineState) -> bool,
    {
        if !self.capabilities().contains(required) {
            return MachineOperationResult::fail(catalog::unsupported_feature(required));
        }
        let Ok(_permit) = self.operation_gate.acquire().await else {
            return MachineOperationResult::fail_with_body(failure, "Connection closed");
        };

        let mut commits = self.shared.commits.subscribe();
        let result = match AssertUnwindSafe(invoke).catch_unwind().await {
            Ok(Ok(())) => {
                let wait = async {
                    loop {
                        let satisfied = done(&self.shared.state.read());
                        if satisfied {
                            return;
                        }
                        if commits.changed().await.is_err() {
                            std::future::pending::<()>().await;
                        }
                    }
                };
                match tokio::time::timeout(self.options.operation_timeout, wait).await {
                    Ok(()) => MachineOperationResult::ok(),
                    Err(_) => MachineOperationResult::fail_with_body(failure, "Timed out"),
                }
            }
            Ok(Err(e)) => MachineOperationResult::fail_with_body(failure, e.to_string()),
            Err(_) => MachineOperationResult::fail_with_body(failure, "Adapter panicked"),
        };

        if let Some(message) = &result.reasoning {
            warn!(machine_id = %self.shared.id, reason = %message.reason(), "machine operation failed");
            if !message.auto_resolve.is_never() {
                let _ = self.shared.commit(StateUpdate::RaiseMessage(message.clone()));
            }
        }
        result
    }

    /// Fetch a file, from the file store when cached, otherwise from the
    /// machine (caching the result).
    #[instrument(skip_all, fields(machine_id = %self.shared.id, uri = %handle.uri))]
    pub async fn download_file(&self, handle: &FileHandle) -> Result<Bytes, AdapterError> {
        if let Some(store) = &self.file_store {
            match store.read(handle).await {
                Ok(Some(data)) => {
                    debug!("file served from store");
                    return Ok(data);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "file store read failed"),
            }
        }

        let stream = AssertUnwindSafe(self.adapter.download_file(handle))
            .catch_unwind()
            .await
            .map_err(|_| AdapterError::Protocol("adapter panicked during download".to_string()))??;
        let data = stream
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?
            .freeze();

        if let Some(store) = &self.file_store {
            if let Err(e) = store.store(handle, data.clone()).await {
                warn!(error = %e, "failed to cache downloaded file");
            }
        }
        Ok(data)
    }

    /// Adapter configuration.
    pub async fn configuration(&self) -> Result<Value, AdapterError> {
        AssertUnwindSafe(self.adapter.configuration())
            .catch_unwind()
            .await
            .map_err(|_| AdapterError::Protocol("adapter panicked reading configuration".to_string()))?
    }

    /// Replace the adapter configuration.
    #[instrument(skip_all, fields(machine_id = %self.shared.id))]
    pub async fn update_configuration(&self, configuration: Value) -> MachineOperationResult {
        match AssertUnwindSafe(self.adapter.update_configuration(configuration))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => MachineOperationResult::fail(catalog::failed_to_update_configuration(e.to_string())),
            Err(_) => MachineOperationResult::fail(catalog::failed_to_update_configuration("Adapter panicked")),
        }
    }
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("id", &self.shared.id)
            .field("discriminator", &self.discriminator)
            .field("connection_state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedAdapter, SimulatedConfig};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use printfleet_core::machine::PrintJob;

    fn hub() -> Arc<BroadcastHub<FleetEvent>> {
        Arc::new(BroadcastHub::new(64))
    }

    fn simulated(config: SimulatedConfig) -> (Arc<SimulatedAdapter>, Connector) {
        let adapter = Arc::new(SimulatedAdapter::new(config));
        let connector = Connector {
            identity: MachineIdentity::default(),
            adapter: adapter.clone(),
        };
        (adapter, connector)
    }

    fn connection(connector: Connector, events: Arc<BroadcastHub<FleetEvent>>) -> DeviceConnection {
        DeviceConnection::new(
            MachineId::from("m1"),
            "simulated",
            connector,
            events,
            None,
            ConnectionOptions {
                connect_timeout: Duration::from_millis(200),
                operation_timeout: Duration::from_millis(200),
            },
        )
    }

    struct HangingAdapter;

    #[async_trait]
    impl VendorAdapter for HangingAdapter {
        async fn connect(&self, _committer: &StateCommitter, _cancel: CancellationToken) -> Result<(), AdapterError> {
            std::future::pending().await
        }

        async fn configuration(&self) -> Result<Value, AdapterError> {
            Ok(Value::Null)
        }
    }

    struct PanickingAdapter;

    #[async_trait]
    impl VendorAdapter for PanickingAdapter {
        async fn connect(&self, _committer: &StateCommitter, _cancel: CancellationToken) -> Result<(), AdapterError> {
            panic!("wire decoder exploded")
        }

        async fn configuration(&self) -> Result<Value, AdapterError> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn connect_publishes_state_change() {
        let events = hub();
        let sub = events.subscribe(16);
        let (_, connector) = simulated(SimulatedConfig::default());
        let conn = connection(connector, events);

        assert!(conn.connect().await.is_success);
        assert_eq!(conn.connection_state(), ConnectionState::Connected);
        assert!(conn.state().is_connected);

        let event = sub.try_recv().unwrap();
        assert_matches!(event, FleetEvent::StateChanged { .. });
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (_, connector) = simulated(SimulatedConfig::default());
        let conn = connection(connector, hub());
        assert!(conn.connect().await.is_success);
        assert!(conn.connect().await.is_success);
        assert_eq!(conn.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn failed_connect_attaches_message() {
        let (_, connector) = simulated(SimulatedConfig {
            fail_connect: true,
            ..SimulatedConfig::default()
        });
        let conn = connection(connector, hub());

        let result = conn.connect().await;
        assert!(!result.is_success);
        assert_eq!(
            result.failure_reason().as_deref(),
            Some("Unable to connect to Machine; An issue occurred connecting to this Machine")
        );
        assert_eq!(conn.connection_state(), ConnectionState::Disconnected);
        assert!(conn.state().has_message_titled(catalog::FAILED_TO_CONNECT));
    }

    #[tokio::test]
    async fn connect_message_auto_resolves_on_later_connect() {
        let (adapter, connector) = simulated(SimulatedConfig {
            fail_connect: true,
            ..SimulatedConfig::default()
        });
        let conn = connection(connector, hub());
        assert!(!conn.connect().await.is_success);
        assert!(conn.state().has_message_titled(catalog::FAILED_TO_CONNECT));

        adapter.set_fail_connect(false);
        assert!(conn.connect().await.is_success);
        assert!(conn.state().messages.is_empty());
    }

    #[tokio::test]
    async fn connect_timeout_becomes_message() {
        let conn = connection(
            Connector {
                identity: MachineIdentity::default(),
                adapter: Arc::new(HangingAdapter),
            },
            hub(),
        );
        let result = conn.connect().await;
        assert!(!result.is_success);
        assert_eq!(conn.connection_state(), ConnectionState::Disconnected);
        assert!(conn.state().has_message_titled(catalog::FAILED_TO_CONNECT));
    }

    #[tokio::test]
    async fn connect_panic_is_contained() {
        let conn = connection(
            Connector {
                identity: MachineIdentity::default(),
                adapter: Arc::new(PanickingAdapter),
            },
            hub(),
        );
        assert!(!conn.connect().await.is_success);
        assert_eq!(conn.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn empty_commit_publishes_nothing() {
        let events = hub();
        let (_, connector) = simulated(SimulatedConfig::default());
        let conn = connection(connector, Arc::clone(&events));
        let sub = events.subscribe(16);

        assert!(!conn.commit_state(StateUpdate::Connected(false)));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn adapter_reported_disconnect_resets_link() {
        let (_, connector) = simulated(SimulatedConfig::default());
        let conn = connection(connector, hub());
        assert!(conn.connect().await.is_success);

        assert!(conn.committer().commit(StateUpdate::Connected(false)));
        assert_eq!(conn.connection_state(), ConnectionState::Disconnected);
    }

    /// Commits status telemetry from a background task for as long as the
    /// link is up, starting before `connect` returns.
    struct ChattyAdapter;

    #[async_trait]
    impl VendorAdapter for ChattyAdapter {
        async fn connect(&self, committer: &StateCommitter, cancel: CancellationToken) -> Result<(), AdapterError> {
            let committer = committer.clone();
            let _ = tokio::spawn(async move {
                let statuses = [MachineStatus::Idle, MachineStatus::Printing];
                let mut i = 0usize;
                while !cancel.is_cancelled() {
                    let _ = committer.commit(StateUpdate::Status(statuses[i % 2]));
                    i = i.wrapping_add(1);
                    tokio::task::yield_now().await;
                }
            });
            tokio::task::yield_now().await;
            Ok(())
        }

        async fn configuration(&self) -> Result<Value, AdapterError> {
            Ok(Value::Null)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commits_during_connect_keep_link_consistent() {
        let conn = connection(
            Connector {
                identity: MachineIdentity::default(),
                adapter: Arc::new(ChattyAdapter),
            },
            hub(),
        );
        for round in 0..50 {
            assert!(conn.connect().await.is_success, "round {round}");
            assert!(conn.state().is_connected, "round {round}");
            assert_eq!(conn.connection_state(), ConnectionState::Connected, "round {round}");
            conn.disconnect().await;
            assert_eq!(conn.connection_state(), ConnectionState::Disconnected, "round {round}");
        }
    }

    #[tokio::test]
    async fn pause_waits_for_committed_status() {
        let (adapter, connector) = simulated(SimulatedConfig::default());
        let conn = connection(connector, hub());
        assert!(conn.connect().await.is_success);
        assert!(adapter.start_job(PrintJob::new("benchy", 60)));

        let result = conn.pause().await;
        assert!(result.is_success, "{:?}", result.failure_reason());
        assert_eq!(conn.state().status, MachineStatus::Paused);

        assert!(conn.resume().await.is_success);
        assert_eq!(conn.state().status, MachineStatus::Printing);
    }

    #[tokio::test]
    async fn missing_capability_is_unsupported_feature() {
        let (_, connector) = simulated(SimulatedConfig {
            capabilities: MachineCapabilities::NONE,
            ..SimulatedConfig::default()
        });
        let conn = connection(connector, hub());
        assert!(conn.connect().await.is_success);

        let result = conn.pause().await;
        assert!(!result.is_success);
        assert_eq!(
            result.failure_reason().as_deref(),
            Some("Unsupported Feature; Machine does not support feature Control")
        );
        assert!(conn.state().messages.is_empty());
    }

    #[tokio::test]
    async fn adapter_error_fails_and_attaches_resolvable_message() {
        let (_, connector) = simulated(SimulatedConfig::default());
        let conn = connection(connector, hub());
        assert!(conn.connect().await.is_success);

        // Idle machine: the simulator refuses to pause.
        let result = conn.pause().await;
        assert!(!result.is_success);
        assert!(result.failure_reason().unwrap().starts_with("Unable to Pause; "));
        assert!(conn.state().has_message_titled(catalog::FAILED_TO_PAUSE));
    }

    #[tokio::test]
    async fn operation_times_out_without_commit() {
        let (adapter, connector) = simulated(SimulatedConfig::default());
        let conn = connection(connector, hub());
        assert!(conn.connect().await.is_success);
        assert!(adapter.start_job(PrintJob::new("benchy", 60)));
        adapter.set_ignore_commands(true);

        let result = conn.stop().await;
        assert_eq!(result.failure_reason().as_deref(), Some("Unable to stop the Machine; Timed out"));
    }

    #[tokio::test]
    async fn mark_as_idle_requires_finished_job() {
        let (adapter, connector) = simulated(SimulatedConfig::default());
        let conn = connection(connector, hub());
        assert!(conn.connect().await.is_success);

        let result = conn.mark_as_idle().await;
        assert_eq!(
            result.failure_reason().as_deref(),
            Some("Unable to Clear Bed; Machine must be Printed or Canceled.")
        );

        assert!(adapter.start_job(PrintJob::new("benchy", 60)));
        assert!(conn.stop().await.is_success);
        assert!(conn.mark_as_idle().await.is_success);
        assert_eq!(conn.state().status, MachineStatus::Idle);
        assert_eq!(conn.state().job_history.len(), 1);
    }

    #[tokio::test]
    async fn set_light_and_air_duct() {
        let (_, connector) = simulated(SimulatedConfig::default());
        let conn = connection(connector, hub());
        assert!(conn.connect().await.is_success);

        assert!(conn.set_light("chamber", true).await.is_success);
        assert_eq!(conn.state().lights.get("chamber"), Some(&true));
        assert!(conn.change_air_duct(AirDuctMode::Heating).await.is_success);
        assert_eq!(conn.state().air_duct_mode, Some(AirDuctMode::Heating));
    }

    #[tokio::test]
    async fn disconnect_commits_disconnected() {
        let (_, connector) = simulated(SimulatedConfig::default());
        let conn = connection(connector, hub());
        assert!(conn.connect().await.is_success);
        conn.disconnect().await;
        assert_eq!(conn.connection_state(), ConnectionState::Disconnected);
        assert_eq!(conn.state().status, MachineStatus::Disconnected);
    }
}
