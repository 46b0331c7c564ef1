//! Persistence of machine configurations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use printfleet_core::MachineId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::StoreError;

/// One stored machine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StoredConfiguration {
    /// Machine id.
    #[serde(rename = "ID")]
    pub id: MachineId,
    /// Selects the connector factory.
    pub discrimination: String,
    /// Adapter-specific configuration.
    pub configuration: Value,
}

impl StoredConfiguration {
    /// Build a record.
    pub fn new(id: MachineId, discrimination: impl Into<String>, configuration: Value) -> Self {
        Self {
            id,
            discrimination: discrimination.into(),
            configuration,
        }
    }
}

/// Where machine configurations live between runs.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Every stored configuration, ordered by machine ID.
    async fn load_configurations(&self) -> Result<Vec<StoredConfiguration>, StoreError>;

    /// Insert or replace the configuration of `configuration.id`.
    async fn store_configuration(&self, configuration: &StoredConfiguration) -> Result<(), StoreError>;

    /// Remove a configuration. Returns whether it existed.
    async fn remove_configuration(&self, id: &MachineId) -> Result<bool, StoreError>;
}

/// Volatile [`ConfigurationStore`].
#[derive(Default)]
pub struct MemoryConfigurationStore {
    records: RwLock<BTreeMap<MachineId, StoredConfiguration>>,
}

impl MemoryConfigurationStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with `configurations`.
    pub fn with_configurations(configurations: impl IntoIterator<Item = StoredConfiguration>) -> Self {
        let records = configurations.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl ConfigurationStore for MemoryConfigurationStore {
    async fn load_configurations(&self) -> Result<Vec<StoredConfiguration>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn store_configuration(&self, configuration: &StoredConfiguration) -> Result<(), StoreError> {
        let _ = self
            .records
            .write()
            .insert(configuration.id.clone(), configuration.clone());
        Ok(())
    }

    async fn remove_configuration(&self, id: &MachineId) -> Result<bool, StoreError> {
        Ok(self.records.write().remove(id).is_some())
    }
}

/// [`ConfigurationStore`] backed by a JSON array on disk.
///
/// Every mutation rewrites the whole file through a temporary sibling and a
/// rename. Mutations are serialized by an async lock.
pub struct JsonFileConfigurationStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileConfigurationStore {
    /// Store at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<MachineId, StoredConfiguration>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "configuration file not found, starting empty");
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let records: Vec<StoredConfiguration> = serde_json::from_str(&content)?;
        Ok(records.into_iter().map(|c| (c.id.clone(), c)).collect())
    }

    async fn write_all(&self, records: &BTreeMap<MachineId, StoredConfiguration>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let list: Vec<&StoredConfiguration> = records.values().collect();
        let json = serde_json::to_vec_pretty(&list)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigurationStore for JsonFileConfigurationStore {
    async fn load_configurations(&self) -> Result<Vec<StoredConfiguration>, StoreError> {
        Ok(self.read_all().await?.into_values().collect())
    }

    async fn store_configuration(&self, configuration: &StoredConfiguration) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        let _ = records.insert(configuration.id.clone(), configuration.clone());
        self.write_all(&records).await
    }

    async fn remove_configuration(&self, id: &MachineId) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        let removed = records.remove(id).is_some();
        if removed {
            self.write_all(&records).await?;
        }
        Ok(removed)
    }
}

// ── Tests ──
