//! The set of machines the hub manages.
//!
//! Connections are built from stored configurations by the factory whose
//! discriminator matches. A configuration that fails to build is logged
//! and skipped; it never prevents the rest of the fleet from loading.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use metrics::counter;
use parking_lot::RwLock;
use printfleet_core::machine::MachineOperationResult;
use printfleet_core::{BroadcastHub, MachineId, Subscription};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapter::ConnectorFactory;
use crate::config_store::{ConfigurationStore, StoredConfiguration};
use crate::connection::{ConnectionOptions, ConnectionState, DeviceConnection};
use crate::errors::RegistryError;
use crate::events::FleetEvent;
use crate::files::FileStore;

/// Registry of device connections keyed by machine id.
pub struct ConnectionRegistry {
    connections: DashMap<MachineId, Arc<DeviceConnection>>,
    factories: RwLock<HashMap<String, Arc<dyn ConnectorFactory>>>,
    config_store: Arc<dyn ConfigurationStore>,
    file_store: Option<Arc<dyn FileStore>>,
    events: Arc<BroadcastHub<FleetEvent>>,
    options: ConnectionOptions,
}

impl ConnectionRegistry {
    /// Empty registry persisting to `config_store` and publishing to `events`.
    pub fn new(config_store: Arc<dyn ConfigurationStore>, events: Arc<BroadcastHub<FleetEvent>>) -> Self {
        Self {
            connections: DashMap::new(),
            factories: RwLock::new(HashMap::new()),
            config_store,
            file_store: None,
            events,
            options: ConnectionOptions::default(),
        }
    }

    /// Cache downloaded files in `store`.
    #[must_use]
    pub fn with_file_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.file_store = Some(store);
        self
    }

    /// Timeouts applied to connections built from now on.
    #[must_use]
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a vendor factory. Returns `false` and keeps the existing
    /// factory when the discriminator is already taken.
    pub fn register_factory(&self, factory: Arc<dyn ConnectorFactory>) -> bool {
        let discriminator = factory.discriminator().to_string();
        let mut factories = self.factories.write();
        if factories.contains_key(&discriminator) {
            warn!(discriminator, "connector factory already registered");
            return false;
        }
        let _ = factories.insert(discriminator, factory);
        true
    }

    /// Hub carrying every [`FleetEvent`].
    pub fn events(&self) -> &Arc<BroadcastHub<FleetEvent>> {
        &self.events
    }

    /// Subscribe to fleet events.
    pub fn subscribe(&self, queue_capacity: usize) -> Subscription<FleetEvent> {
        self.events.subscribe(queue_capacity)
    }

    /// Shared machine file store, when configured.
    pub fn file_store(&self) -> Option<&Arc<dyn FileStore>> {
        self.file_store.as_ref()
    }

    fn publish(&self, event: FleetEvent) {
        counter!("fleet_events_published_total", "kind" => event.kind()).increment(1);
        self.events.publish(event);
    }

    /// Build a disconnected connection without registering it.
    pub fn build(
        &self,
        id: &MachineId,
        discriminator: &str,
        configuration: &Value,
    ) -> Result<DeviceConnection, RegistryError> {
        let factory = self
            .factories
            .read()
            .get(discriminator)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownDiscriminator(discriminator.to_string()))?;
        let connector = factory.create(id, configuration)?;
        Ok(DeviceConnection::new(
            id.clone(),
            discriminator,
            connector,
            Arc::clone(&self.events),
            self.file_store.clone(),
            self.options,
        ))
    }

    fn insert(&self, connection: DeviceConnection) -> Arc<DeviceConnection> {
        let connection = Arc::new(connection);
        if let Some(previous) = self
            .connections
            .insert(connection.id().clone(), Arc::clone(&connection))
        {
            debug!(machine_id = %previous.id(), "replacing existing connection");
            previous.retire();
        }
        connection
    }

    /// Register a connection for every configuration that builds. Returns
    /// how many were registered.
    pub fn load_from_configurations(&self, configurations: &[StoredConfiguration]) -> usize {
        let mut loaded = 0;
        for stored in configurations {
            match self.build(&stored.id, &stored.discrimination, &stored.configuration) {
                Ok(connection) => {
                    let _ = self.insert(connection);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(machine_id = %stored.id, discriminator = %stored.discrimination, error = %e, "skipping machine configuration");
                }
            }
        }
        info!(loaded, total = configurations.len(), "machine configurations loaded");
        loaded
    }

    /// Load every configuration from the configuration store.
    pub async fn load_from_store(&self) -> Result<usize, RegistryError> {
        let configurations = self.config_store.load_configurations().await?;
        Ok(self.load_from_configurations(&configurations))
    }

    /// Spawn a connect for every disconnected machine, in id order.
    /// Devices not yet visited when `cancel` fires are skipped.
    pub fn connect_if_disconnected(&self, cancel: &CancellationToken) -> Vec<JoinHandle<MachineOperationResult>> {
        let mut handles = Vec::new();
        for connection in self.snapshot() {
            if cancel.is_cancelled() {
                debug!("connect sweep cancelled");
                break;
            }
            if connection.connection_state() != ConnectionState::Disconnected {
                continue;
            }
            handles.push(tokio::spawn(async move { connection.connect_if_disconnected().await }));
        }
        handles
    }

    /// Run [`Self::connect_if_disconnected`] every `interval` until `cancel`
    /// fires.
    pub async fn run_reconnect_sweep(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let started = self.connect_if_disconnected(&cancel).len();
                    if started > 0 {
                        debug!(started, "reconnect sweep started connects");
                    }
                }
            }
        }
    }

    /// Persist, register, and start connecting a new machine.
    #[instrument(skip(self, configuration), fields(machine_id = %id))]
    pub async fn add(
        &self,
        id: MachineId,
        discriminator: &str,
        configuration: Value,
    ) -> Result<Arc<DeviceConnection>, RegistryError> {
        let connection = self.build(&id, discriminator, &configuration)?;
        self.config_store
            .store_configuration(&StoredConfiguration::new(id.clone(), discriminator, configuration))
            .await?;

        let connection = self.insert(connection);
        self.publish(FleetEvent::MachineAdded {
            machine_id: id,
            time: Utc::now(),
        });
        info!("machine added");

        let connecting = Arc::clone(&connection);
        let _ = tokio::spawn(async move { connecting.connect().await });
        Ok(connection)
    }

    /// Unregister a machine, forget its configuration, and disconnect it.
    #[instrument(skip(self), fields(machine_id = %id))]
    pub async fn remove(&self, id: &MachineId) -> Result<(), RegistryError> {
        let (_, connection) = self
            .connections
            .remove(id)
            .ok_or_else(|| RegistryError::UnknownMachine(id.clone()))?;
        if let Err(e) = self.config_store.remove_configuration(id).await {
            warn!(error = %e, "failed to remove stored configuration");
        }
        connection.disconnect().await;
        self.publish(FleetEvent::MachineRemoved {
            machine_id: id.clone(),
            time: Utc::now(),
        });
        info!("machine removed");
        Ok(())
    }

    /// Hand `configuration` to the machine's adapter and persist it when the
    /// adapter accepts it.
    #[instrument(skip(self, configuration), fields(machine_id = %id))]
    pub async fn update_configuration(
        &self,
        id: &MachineId,
        configuration: Value,
    ) -> Result<MachineOperationResult, RegistryError> {
        let connection = self.get(id).ok_or_else(|| RegistryError::UnknownMachine(id.clone()))?;
        let result = connection.update_configuration(configuration.clone()).await;
        if !result.is_success {
            return Ok(result);
        }

        self.config_store
            .store_configuration(&StoredConfiguration::new(
                id.clone(),
                connection.discriminator(),
                configuration.clone(),
            ))
            .await?;
        self.publish(FleetEvent::ConfigurationUpdated {
            machine_id: id.clone(),
            configuration,
            time: Utc::now(),
        });
        Ok(result)
    }

    /// Connection for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<DeviceConnection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// All connections, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<DeviceConnection>> {
        let mut connections: Vec<_> = self.connections.iter().map(|e| Arc::clone(e.value())).collect();
        connections.sort_by(|a, b| a.id().cmp(b.id()));
        connections
    }

    /// Number of registered machines.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no machine is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Current adapter configuration of every machine. Machines whose
    /// adapter fails to report are skipped.
    pub async fn configurations(&self) -> Vec<StoredConfiguration> {
        let mut configurations = Vec::new();
        for connection in self.snapshot() {
            match connection.configuration().await {
                Ok(value) => configurations.push(StoredConfiguration::new(
                    connection.id().clone(),
                    connection.discriminator(),
                    value,
                )),
                Err(e) => warn!(machine_id = %connection.id(), error = %e, "failed to read machine configuration"),
            }
        }
        configurations
    }

    /// Disconnect every machine.
    pub async fn disconnect_all(&self) {
        for connection in self.snapshot() {
            connection.disconnect().await;
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("machines", &self.connections.len())
            .field("factories", &self.factories.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::MemoryConfigurationStore;
    use crate::simulated::SimulatedFactory;
    use assert_matches::assert_matches;
    use printfleet_core::machine::{MachineStatus, StateUpdate};
    use serde_json::json;

    fn registry(store: Arc<MemoryConfigurationStore>) -> ConnectionRegistry {
        let registry = ConnectionRegistry::new(store, Arc::new(BroadcastHub::new(64)));
        assert!(registry.register_factory(Arc::new(SimulatedFactory::new())));
        registry
    }

    #[test]
    fn duplicate_factory_is_rejected() {
        let registry = registry(Arc::new(MemoryConfigurationStore::new()));
        assert!(!registry.register_factory(Arc::new(SimulatedFactory::new())));
    }

    #[test]
    fn unknown_discriminator_is_skipped() {
        let registry = registry(Arc::new(MemoryConfigurationStore::new()));
        let loaded = registry.load_from_configurations(&[
            StoredConfiguration::new(MachineId::from("a"), "simulated", json!({})),
            StoredConfiguration::new(MachineId::from("b"), "bambu", json!({})),
        ]);
        assert_eq!(loaded, 1);
        assert!(registry.get("a").is_some());
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn build_reports_unknown_discriminator() {
        let registry = registry(Arc::new(MemoryConfigurationStore::new()));
        let err = registry.build(&MachineId::from("a"), "prusa", &Value::Null).unwrap_err();
        assert_matches!(err, RegistryError::UnknownDiscriminator(d) if d == "prusa");
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = registry(Arc::new(MemoryConfigurationStore::new()));
        let _ = registry.load_from_configurations(&[
            StoredConfiguration::new(MachineId::from("c"), "simulated", Value::Null),
            StoredConfiguration::new(MachineId::from("a"), "simulated", Value::Null),
            StoredConfiguration::new(MachineId::from("b"), "simulated", Value::Null),
        ]);
        let ids: Vec<_> = registry.snapshot().iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cancelled_sweep_starts_nothing() {
        let registry = registry(Arc::new(MemoryConfigurationStore::new()));
        let _ = registry.load_from_configurations(&[StoredConfiguration::new(
            MachineId::from("a"),
            "simulated",
            Value::Null,
        )]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(registry.connect_if_disconnected(&cancel).is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_replaces_and_retires_previous_connection() {
        let events = Arc::new(BroadcastHub::new(64));
        let registry = ConnectionRegistry::new(Arc::new(MemoryConfigurationStore::new()), Arc::clone(&events));
        let factory = Arc::new(SimulatedFactory::new());
        assert!(registry.register_factory(factory.clone()));
        let stored = [StoredConfiguration::new(MachineId::from("a"), "simulated", json!({"Nickname": "Old"}))];

        assert_eq!(registry.load_from_configurations(&stored), 1);
        let old = registry.get("a").unwrap();
        assert!(old.connect().await.is_success);
        let old_committer = old.committer();

        assert_eq!(registry.load_from_configurations(&stored), 1);
        let new = registry.get("a").unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(registry.len(), 1);
        assert!(old.is_retired());
        assert!(!new.is_retired());
        assert_eq!(old.connection_state(), ConnectionState::Disconnected);

        let sub = events.subscribe(16);
        assert!(!old_committer.commit(StateUpdate::Status(MachineStatus::Printing)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sub.drain().is_empty());

        assert!(new.connect().await.is_success);
        assert_matches!(sub.try_recv(), Some(FleetEvent::StateChanged { machine_id, .. }) if machine_id.as_str() == "a");
    }

    #[tokio::test]
    async fn remove_unknown_machine() {
        let registry = registry(Arc::new(MemoryConfigurationStore::new()));
        let err = registry.remove(&MachineId::from("ghost")).await.unwrap_err();
        assert_eq!(err.to_string(), "Could not find Machine with ID ghost");
    }

    #[tokio::test]
    async fn add_persists_configuration() {
        let store = Arc::new(MemoryConfigurationStore::new());
        let registry = registry(Arc::clone(&store));
        let _ = registry
            .add(MachineId::from("a"), "simulated", json!({"Nickname": "Left"}))
            .await
            .unwrap();

        let stored = store.load_configurations().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].discrimination, "simulated");
        assert_eq!(registry.get("a").unwrap().identity().nickname.as_deref(), Some("Left"));
    }

    #[tokio::test]
    async fn add_with_bad_configuration_persists_nothing() {
        let store = Arc::new(MemoryConfigurationStore::new());
        let registry = registry(Arc::clone(&store));
        let err = registry
            .add(MachineId::from("a"), "simulated", json!({"FailConnect": "sometimes"}))
            .await
            .unwrap_err();
        assert_matches!(err, RegistryError::Adapter(_));
        assert!(store.load_configurations().await.unwrap().is_empty());
        assert!(registry.is_empty());
    }
}
