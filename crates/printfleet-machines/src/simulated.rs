//! In-process machine used by tests and `--simulate` demos.
//!
//! The simulator answers operation hooks by committing the status a real
//! machine would report, so the connection's wait-for-commit path is
//! exercised the same way as with a vendor adapter.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use printfleet_core::MachineId;
use printfleet_core::machine::{
    AirDuctMode, FileHandle, MachineCapabilities, MachineIdentity, MachineOperationResult, MachineStatus,
    PrintJob, StateUpdate, catalog,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::{Connector, ConnectorFactory, FileStream, VendorAdapter};
use crate::connection::StateCommitter;
use crate::errors::AdapterError;

/// Discriminator of [`SimulatedFactory`] configurations.
pub const SIMULATED_DISCRIMINATOR: &str = "simulated";

fn default_capabilities() -> MachineCapabilities {
    MachineCapabilities::CONTROL
        | MachineCapabilities::LIGHTING
        | MachineCapabilities::AIR_DUCT
        | MachineCapabilities::PRINT_HISTORY
        | MachineCapabilities::LOCAL_JOBS
}

/// Stored configuration of a simulated machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SimulatedConfig {
    /// Operator-assigned name.
    pub nickname: Option<String>,
    /// Reported brand.
    pub brand: Option<String>,
    /// Reported model.
    pub model: Option<String>,
    /// Capabilities the simulation advertises.
    pub capabilities: MachineCapabilities,
    /// Refuse every connect attempt.
    pub fail_connect: bool,
    /// File contents by URI.
    pub files: BTreeMap<String, String>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            nickname: None,
            brand: Some("Simulated".to_string()),
            model: Some("Sim-1".to_string()),
            capabilities: default_capabilities(),
            fail_connect: false,
            files: BTreeMap::new(),
        }
    }
}

impl SimulatedConfig {
    fn identity(&self) -> MachineIdentity {
        MachineIdentity {
            nickname: self.nickname.clone(),
            brand: self.brand.clone(),
            model: self.model.clone(),
        }
    }
}

/// Scriptable in-memory machine.
pub struct SimulatedAdapter {
    config: Mutex<SimulatedConfig>,
    committer: Mutex<Option<StateCommitter>>,
    fail_connect: AtomicBool,
    ignore_commands: AtomicBool,
}

impl SimulatedAdapter {
    /// A disconnected simulated machine.
    pub fn new(config: SimulatedConfig) -> Self {
        let fail_connect = AtomicBool::new(config.fail_connect);
        Self {
            config: Mutex::new(config),
            committer: Mutex::new(None),
            fail_connect,
            ignore_commands: AtomicBool::new(false),
        }
    }

    /// Make later connect attempts fail or succeed.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Accept operation requests without ever acting on them.
    pub fn set_ignore_commands(&self, ignore: bool) {
        self.ignore_commands.store(ignore, Ordering::SeqCst);
    }

    /// Start `job` as if it was launched at the machine. No-op while
    /// disconnected.
    pub fn start_job(&self, job: PrintJob) -> bool {
        self.commit(StateUpdate::Batch(vec![
            StateUpdate::Job(Some(job)),
            StateUpdate::Status(MachineStatus::Printing),
        ]))
    }

    /// Report progress of the current job.
    pub fn report_progress(&self, percentage_complete: u8, remaining_secs: u64) -> bool {
        self.commit(StateUpdate::JobProgress {
            percentage_complete,
            remaining_secs,
            stage: None,
        })
    }

    /// Finish the current job successfully.
    pub fn finish_job(&self) -> bool {
        self.commit(StateUpdate::Status(MachineStatus::Printed))
    }

    /// Drop the link as if the machine went away.
    pub fn drop_link(&self) -> bool {
        self.commit(StateUpdate::Connected(false))
    }

    fn commit(&self, update: StateUpdate) -> bool {
        let committer = self.committer.lock().clone();
        committer.is_some_and(|c| c.commit(update))
    }

    fn status(&self) -> Option<MachineStatus> {
        let committer = self.committer.lock().clone();
        committer.map(|c| c.state().status)
    }

    /// Commit `update` when the machine is in a status accepted by `allowed`.
    fn command(&self, name: &str, allowed: fn(MachineStatus) -> bool, update: StateUpdate) -> Result<(), AdapterError> {
        if self.ignore_commands.load(Ordering::SeqCst) {
            debug!(command = name, "simulated machine ignoring command");
            return Ok(());
        }
        let status = self
            .status()
            .ok_or_else(|| AdapterError::Connection("not connected".to_string()))?;
        if !allowed(status) {
            return Err(AdapterError::Protocol(format!("cannot {name} while {status}")));
        }
        let _ = self.commit(update);
        Ok(())
    }
}

#[async_trait]
impl VendorAdapter for SimulatedAdapter {
    async fn connect(&self, committer: &StateCommitter, _cancel: CancellationToken) -> Result<(), AdapterError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AdapterError::Connection("connection refused".to_string()));
        }
        let capabilities = self.config.lock().capabilities;
        *self.committer.lock() = Some(committer.clone());

        let status = committer.state().status;
        let status = match status {
            MachineStatus::Disconnected | MachineStatus::Unknown => MachineStatus::Idle,
            other => other,
        };
        let _ = committer.commit(StateUpdate::Batch(vec![
            StateUpdate::Capabilities(capabilities),
            StateUpdate::Status(status),
        ]));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        let _ = self.committer.lock().take();
        Ok(())
    }

    async fn download_file(&self, handle: &FileHandle) -> Result<FileStream, AdapterError> {
        let content = self
            .config
            .lock()
            .files
            .get(&handle.uri)
            .cloned()
            .ok_or_else(|| AdapterError::FileNotFound(handle.uri.clone()))?;
        let chunks: Vec<std::io::Result<Bytes>> = content
            .into_bytes()
            .chunks(4096)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn configuration(&self) -> Result<Value, AdapterError> {
        serde_json::to_value(&*self.config.lock()).map_err(|e| AdapterError::Configuration(e.to_string()))
    }

    async fn update_configuration(&self, configuration: Value) -> Result<MachineOperationResult, AdapterError> {
        let config: SimulatedConfig = match serde_json::from_value(configuration) {
            Ok(config) => config,
            Err(e) => {
                return Ok(MachineOperationResult::fail(catalog::failed_to_update_configuration(
                    e.to_string(),
                )));
            }
        };
        self.set_fail_connect(config.fail_connect);
        let capabilities = config.capabilities;
        *self.config.lock() = config;
        let _ = self.commit(StateUpdate::Capabilities(capabilities));
        Ok(MachineOperationResult::ok())
    }

    async fn pause(&self) -> Result<(), AdapterError> {
        self.command(
            "pause",
            |s| s == MachineStatus::Printing,
            StateUpdate::Status(MachineStatus::Paused),
        )
    }

    async fn resume(&self) -> Result<(), AdapterError> {
        self.command(
            "resume",
            |s| s == MachineStatus::Paused,
            StateUpdate::Status(MachineStatus::Printing),
        )
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.command("stop", MachineStatus::is_active, StateUpdate::Status(MachineStatus::Canceled))
    }

    async fn clear_bed(&self) -> Result<(), AdapterError> {
        self.command("clear bed", MachineStatus::is_finished, StateUpdate::Status(MachineStatus::Idle))
    }

    async fn set_light(&self, name: &str, on: bool) -> Result<(), AdapterError> {
        self.command(
            "set light",
            |_| true,
            StateUpdate::Light {
                name: name.to_string(),
                on,
            },
        )
    }

    async fn change_air_duct(&self, mode: AirDuctMode) -> Result<(), AdapterError> {
        self.command("change air duct", |_| true, StateUpdate::AirDuct(Some(mode)))
    }
}

/// Builds [`SimulatedAdapter`]s and keeps them reachable for scripting.
#[derive(Default)]
pub struct SimulatedFactory {
    adapters: DashMap<MachineId, Arc<SimulatedAdapter>>,
}

impl SimulatedFactory {
    /// A factory for simulated machines.
    pub fn new() -> Self {
        Self::default()
    }

    /// The adapter most recently built for `id`.
    pub fn adapter(&self, id: &MachineId) -> Option<Arc<SimulatedAdapter>> {
        self.adapters.get(id).map(|entry| Arc::clone(entry.value()))
    }
}

impl ConnectorFactory for SimulatedFactory {
    fn discriminator(&self) -> &str {
        SIMULATED_DISCRIMINATOR
    }

    fn create(&self, id: &MachineId, configuration: &Value) -> Result<Connector, AdapterError> {
        let config: SimulatedConfig = if configuration.is_null() {
            SimulatedConfig::default()
        } else {
            serde_json::from_value(configuration.clone())
                .map_err(|e| AdapterError::Configuration(e.to_string()))?
        };
        let identity = config.identity();
        let adapter = Arc::new(SimulatedAdapter::new(config));
        let _ = self.adapters.insert(id.clone(), Arc::clone(&adapter));
        Ok(Connector { identity, adapter })
    }
}
