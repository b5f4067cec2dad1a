//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryStorageBackend` and `MemoryBackupCatalog` that satisfy the
//! trait contracts without touching disk. The storage fake can be told to
//! corrupt writes or fail deletes so verification and pruning failure paths
//! are reachable from tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryStorageBackend
// ---------------------------------------------------------------------------

/// In-memory payload store backed by a `BTreeMap<location, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryStorageBackend {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    corrupt_writes: Mutex<bool>,
    failing_deletes: Mutex<HashSet<String>>,
    unavailable: Mutex<bool>,
}

impl MemoryStorageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subsequent writes store altered bytes, so verification fails.
    pub fn corrupt_writes(&self, corrupt: bool) {
        *self.corrupt_writes.lock().unwrap() = corrupt;
    }

    /// Deleting the given location fails with `Unavailable`.
    pub fn fail_delete_of(&self, location: &StorageLocation) {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert(location.as_str().to_string());
    }

    /// Every operation fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    /// Insert a payload directly, bypassing the write path.
    pub fn insert_raw(&self, key: &str, data: &[u8]) -> StorageLocation {
        let location = format!("mem://{key}");
        self.blobs
            .lock()
            .unwrap()
            .insert(location.clone(), data.to_vec());
        StorageLocation(location)
    }

    pub fn contains(&self, location: &StorageLocation) -> bool {
        self.blobs.lock().unwrap().contains_key(location.as_str())
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> StorageResult<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(StorageError::Unavailable("memory backend offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    async fn write(&self, key: &str, payload: &[u8]) -> StorageResult<StorageLocation> {
        self.check_available()?;
        let mut data = payload.to_vec();
        if *self.corrupt_writes.lock().unwrap() {
            data.push(0xFF);
        }
        let location = format!("mem://{key}");
        self.blobs.lock().unwrap().insert(location.clone(), data);
        Ok(StorageLocation(location))
    }

    async fn verify(
        &self,
        location: &StorageLocation,
        expected: &ContentDigest,
    ) -> StorageResult<bool> {
        self.check_available()?;
        let blobs = self.blobs.lock().unwrap();
        Ok(blobs
            .get(location.as_str())
            .map_or(false, |data| ContentDigest::from_bytes(data) == *expected))
    }

    async fn delete(&self, location: &StorageLocation) -> StorageResult<()> {
        self.check_available()?;
        if self
            .failing_deletes
            .lock()
            .unwrap()
            .contains(location.as_str())
        {
            return Err(StorageError::Unavailable(format!(
                "delete refused for {location}"
            )));
        }
        self.blobs.lock().unwrap().remove(location.as_str());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<StorageLocation>> {
        self.check_available()?;
        let full_prefix = format!("mem://{prefix}");
        let blobs = self.blobs.lock().unwrap();
        Ok(blobs
            .keys()
            .filter(|k| k.starts_with(&full_prefix))
            .map(|k| StorageLocation(k.clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryBackupCatalog
// ---------------------------------------------------------------------------

/// In-memory catalog backed by a `Vec<BackupArtifact>` kept oldest first.
#[derive(Debug, Default)]
pub struct MemoryBackupCatalog {
    artifacts: Mutex<Vec<BackupArtifact>>,
}

impl MemoryBackupCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the catalog with existing artifacts.
    pub fn with_artifacts(artifacts: Vec<BackupArtifact>) -> Self {
        let mut artifacts = artifacts;
        sort_oldest_first(&mut artifacts);
        Self {
            artifacts: Mutex::new(artifacts),
        }
    }
}

#[async_trait]
impl BackupCatalog for MemoryBackupCatalog {
    async fn append(&self, artifact: BackupArtifact) -> StorageResult<()> {
        let mut artifacts = self.artifacts.lock().unwrap();
        if artifacts.iter().any(|a| a.id == artifact.id) {
            return Err(StorageError::DuplicateArtifact {
                id: artifact.id.to_string(),
            });
        }
        artifacts.push(artifact);
        sort_oldest_first(&mut artifacts);
        Ok(())
    }

    async fn remove(&self, id: &ArtifactId) -> StorageResult<()> {
        let mut artifacts = self.artifacts.lock().unwrap();
        let before = artifacts.len();
        artifacts.retain(|a| &a.id != id);
        if artifacts.len() == before {
            return Err(StorageError::ArtifactNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<BackupArtifact>> {
        Ok(self.artifacts.lock().unwrap().clone())
    }
}
