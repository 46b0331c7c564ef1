//! Narrow interfaces to vendor-specific machine adapters.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use printfleet_core::MachineId;
use printfleet_core::machine::{AirDuctMode, FileHandle, MachineIdentity, MachineOperationResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::connection::StateCommitter;
use crate::errors::AdapterError;

/// Chunked file content streamed from a machine.
pub type FileStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Vendor wire adapter driving one machine.
///
/// The adapter mutates machine state only through the [`StateCommitter`]
/// handed to [`VendorAdapter::connect`]. Operation hooks only ask the machine
/// to act; the connection waits for the resulting state to be committed.
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    /// Establish the connection. `cancel` fires when the connection is torn
    /// down; long-lived adapter tasks should watch it.
    async fn connect(&self, committer: &StateCommitter, cancel: CancellationToken) -> Result<(), AdapterError>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Stream a file stored on the machine.
    async fn download_file(&self, _handle: &FileHandle) -> Result<FileStream, AdapterError> {
        Err(AdapterError::Unsupported("download_file"))
    }

    /// Current adapter configuration.
    async fn configuration(&self) -> Result<Value, AdapterError>;

    /// Replace the adapter configuration.
    async fn update_configuration(&self, _configuration: Value) -> Result<MachineOperationResult, AdapterError> {
        Err(AdapterError::Unsupported("update_configuration"))
    }

    /// Pause the current job.
    async fn pause(&self) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("pause"))
    }

    /// Resume a paused job.
    async fn resume(&self) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("resume"))
    }

    /// Cancel the current job.
    async fn stop(&self) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("stop"))
    }

    /// Acknowledge the bed is clear so the machine can go idle.
    async fn clear_bed(&self) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("clear_bed"))
    }

    /// Switch a named light.
    async fn set_light(&self, _name: &str, _on: bool) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("set_light"))
    }

    /// Switch the chamber air duct mode.
    async fn change_air_duct(&self, _mode: AirDuctMode) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("change_air_duct"))
    }
}

/// A freshly created adapter with the identity it reports.
pub struct Connector {
    /// Descriptive identity.
    pub identity: MachineIdentity,
    /// The adapter.
    pub adapter: Arc<dyn VendorAdapter>,
}

/// Builds adapters for one vendor from stored configuration.
pub trait ConnectorFactory: Send + Sync {
    /// Discriminator stored alongside configurations this factory handles.
    fn discriminator(&self) -> &str;

    /// Build an adapter for machine `id`.
    fn create(&self, id: &MachineId, configuration: &Value) -> Result<Connector, AdapterError>;
}
