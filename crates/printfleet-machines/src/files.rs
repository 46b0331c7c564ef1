//! Content-addressed storage for files downloaded from machines.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use printfleet_core::MachineId;
use printfleet_core::machine::FileHandle;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::StoreError;

/// Uppercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data).iter().map(|byte| format!("{byte:02X}")).collect()
}

/// Selection of files to evict.
#[derive(Clone, Debug, Default)]
pub struct PruneOptions {
    /// Remove files stored before this instant.
    pub stored_before: Option<DateTime<Utc>>,
    /// Then evict least recently read files until the total fits.
    pub max_total_bytes: Option<u64>,
    /// Only consider files of this machine.
    pub machine_id: Option<MachineId>,
}

/// Outcome of a prune.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PruneResult {
    /// Files deleted.
    pub files_removed: usize,
    /// Bytes released.
    pub bytes_freed: u64,
}

/// Usage of a file store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StorageInfo {
    /// Stored files.
    pub file_count: usize,
    /// Bytes in use.
    pub total_bytes: u64,
    /// Configured upper bound.
    pub max_bytes: u64,
}

/// Storage for machine files, keyed by [`FileHandle`].
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `data`, verifying it against the handle's hash.
    async fn store(&self, handle: &FileHandle, data: Bytes) -> Result<(), StoreError>;

    /// Content of a stored file.
    async fn read(&self, handle: &FileHandle) -> Result<Option<Bytes>, StoreError>;

    /// Whether a file is stored.
    async fn contains(&self, handle: &FileHandle) -> bool;

    /// Remove a file. Returns whether it existed.
    async fn delete(&self, handle: &FileHandle) -> Result<bool, StoreError>;

    /// Delete files matching `options`.
    async fn prune(&self, options: PruneOptions) -> Result<PruneResult, StoreError>;

    /// Usage of the whole store, or of one machine's files.
    async fn storage_info(&self, machine_id: Option<&MachineId>) -> StorageInfo;
}

struct StoredFile {
    data: Bytes,
    stored_at: DateTime<Utc>,
    last_read: DateTime<Utc>,
}

/// In-memory [`FileStore`] bounded by total size. Storing past the bound
/// evicts the least recently read files first.
pub struct MemoryFileStore {
    files: Mutex<HashMap<FileHandle, StoredFile>>,
    max_bytes: u64,
}

impl MemoryFileStore {
    /// Create a store holding at most `max_bytes`.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            max_bytes,
        }
    }
}

fn total_bytes<'a>(files: impl Iterator<Item = &'a StoredFile>) -> u64 {
    files.map(|f| f.data.len() as u64).sum()
}

/// Evict least recently read files matching `filter` until `total <= limit`.
fn evict_lru(
    files: &mut HashMap<FileHandle, StoredFile>,
    limit: u64,
    filter: impl Fn(&FileHandle) -> bool,
) -> PruneResult {
    let mut result = PruneResult::default();
    let mut total = total_bytes(files.iter().filter(|(h, _)| filter(h)).map(|(_, f)| f));
    if total <= limit {
        return result;
    }
    let mut candidates: Vec<(FileHandle, DateTime<Utc>)> = files
        .iter()
        .filter(|(h, _)| filter(h))
        .map(|(h, f)| (h.clone(), f.last_read))
        .collect();
    candidates.sort_by_key(|(_, last_read)| *last_read);

    for (handle, _) in candidates {
        if total <= limit {
            break;
        }
        if let Some(file) = files.remove(&handle) {
            let size = file.data.len() as u64;
            total -= size;
            result.files_removed += 1;
            result.bytes_freed += size;
        }
    }
    result
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn store(&self, handle: &FileHandle, data: Bytes) -> Result<(), StoreError> {
        let actual = sha256_hex(&data);
        if !actual.eq_ignore_ascii_case(&handle.hash_sha256) {
            return Err(StoreError::HashMismatch {
                expected: handle.hash_sha256.clone(),
                actual,
            });
        }
        let needed = data.len() as u64;
        if needed > self.max_bytes {
            return Err(StoreError::Full {
                needed,
                available: self.max_bytes,
            });
        }

        let mut files = self.files.lock();
        let _ = files.remove(handle);
        let evicted = evict_lru(&mut files, self.max_bytes - needed, |_| true);
        if evicted.files_removed > 0 {
            debug!(files = evicted.files_removed, bytes = evicted.bytes_freed, "evicted files to make room");
        }
        let now = Utc::now();
        let _ = files.insert(
            handle.clone(),
            StoredFile {
                data,
                stored_at: now,
                last_read: now,
            },
        );
        Ok(())
    }

    async fn read(&self, handle: &FileHandle) -> Result<Option<Bytes>, StoreError> {
        let mut files = self.files.lock();
        Ok(files.get_mut(handle).map(|file| {
            file.last_read = Utc::now();
            file.data.clone()
        }))
    }

    async fn contains(&self, handle: &FileHandle) -> bool {
        self.files.lock().contains_key(handle)
    }

    async fn delete(&self, handle: &FileHandle) -> Result<bool, StoreError> {
        Ok(self.files.lock().remove(handle).is_some())
    }

    async fn prune(&self, options: PruneOptions) -> Result<PruneResult, StoreError> {
        let matches = |handle: &FileHandle| {
            options
                .machine_id
                .as_ref()
                .is_none_or(|id| *id == handle.machine_id)
        };
        let mut files = self.files.lock();
        let mut result = PruneResult::default();

        if let Some(cutoff) = options.stored_before {
            let expired: Vec<FileHandle> = files
                .iter()
                .filter(|(h, f)| matches(h) && f.stored_at < cutoff)
                .map(|(h, _)| h.clone())
                .collect();
            for handle in expired {
                if let Some(file) = files.remove(&handle) {
                    result.files_removed += 1;
                    result.bytes_freed += file.data.len() as u64;
                }
            }
        }

        if let Some(limit) = options.max_total_bytes {
            let evicted = evict_lru(&mut files, limit, matches);
            result.files_removed += evicted.files_removed;
            result.bytes_freed += evicted.bytes_freed;
        }
        Ok(result)
    }

    async fn storage_info(&self, machine_id: Option<&MachineId>) -> StorageInfo {
        let files = self.files.lock();
        let selected: Vec<&StoredFile> = files
            .iter()
            .filter(|(h, _)| machine_id.is_none_or(|id| *id == h.machine_id))
            .map(|(_, f)| f)
            .collect();
        StorageInfo {
            file_count: selected.len(),
            total_bytes: total_bytes(selected.into_iter()),
            max_bytes: self.max_bytes,
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn handle(machine: &str, uri: &str, data: &[u8]) -> FileHandle {
        FileHandle::new(MachineId::from(machine), uri, "application/octet-stream", sha256_hex(data))
    }

    #[tokio::test]
    async fn store_and_read() {
        let store = MemoryFileStore::new(1024);
        let h = handle("m1", "/a", b"hello");
        store.store(&h, Bytes::from_static(b"hello")).await.unwrap();

        assert!(store.contains(&h).await);
        assert_eq!(store.read(&h).await.unwrap().unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn hash_is_verified() {
        let store = MemoryFileStore::new(1024);
        let h = handle("m1", "/a", b"hello");
        let err = store.store(&h, Bytes::from_static(b"tampered")).await.unwrap_err();
        assert_matches!(err, StoreError::HashMismatch { .. });
        assert!(!store.contains(&h).await);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let store = MemoryFileStore::new(4);
        let h = handle("m1", "/a", b"hello");
        assert_matches!(
            store.store(&h, Bytes::from_static(b"hello")).await,
            Err(StoreError::Full { needed: 5, .. })
        );
    }

    #[tokio::test]
    async fn storing_past_limit_evicts_least_recently_read() {
        let store = MemoryFileStore::new(10);
        let a = handle("m1", "/a", b"aaaa");
        let b = handle("m1", "/b", b"bbbb");
        let c = handle("m1", "/c", b"cccc");
        store.store(&a, Bytes::from_static(b"aaaa")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.store(&b, Bytes::from_static(b"bbbb")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let _ = store.read(&a).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        store.store(&c, Bytes::from_static(b"cccc")).await.unwrap();
        assert!(store.contains(&a).await);
        assert!(!store.contains(&b).await);
        assert!(store.contains(&c).await);
    }

    #[tokio::test]
    async fn storage_info_per_machine() {
        let store = MemoryFileStore::new(1024);
        store.store(&handle("m1", "/a", b"12"), Bytes::from_static(b"12")).await.unwrap();
        store.store(&handle("m2", "/b", b"345"), Bytes::from_static(b"345")).await.unwrap();

        let all = store.storage_info(None).await;
        assert_eq!(all.file_count, 2);
        assert_eq!(all.total_bytes, 5);

        let m2 = store.storage_info(Some(&MachineId::from("m2"))).await;
        assert_eq!(m2.file_count, 1);
        assert_eq!(m2.total_bytes, 3);
        assert_eq!(m2.max_bytes, 1024);
    }

    #[tokio::test]
    async fn prune_by_age_and_machine() {
        let store = MemoryFileStore::new(1024);
        store.store(&handle("m1", "/a", b"1"), Bytes::from_static(b"1")).await.unwrap();
        store.store(&handle("m2", "/b", b"2"), Bytes::from_static(b"2")).await.unwrap();

        let result = store
            .prune(PruneOptions {
                stored_before: Some(Utc::now() + chrono::Duration::seconds(1)),
                machine_id: Some(MachineId::from("m1")),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result, PruneResult { files_removed: 1, bytes_freed: 1 });
        assert_eq!(store.storage_info(None).await.file_count, 1);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = MemoryFileStore::new(1024);
        let h = handle("m1", "/a", b"x");
        store.store(&h, Bytes::from_static(b"x")).await.unwrap();
        assert!(store.delete(&h).await.unwrap());
        assert!(!store.delete(&h).await.unwrap());
    }

    #[test]
    fn sha256_hex_is_uppercase() {
        assert_eq!(
            sha256_hex(b"abc"),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
    }
}
