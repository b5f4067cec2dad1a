use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{
    sort_oldest_first, ArtifactId, BackupArtifact, BackupCatalog, StorageResult,
};

const CATALOG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    schema_version: u32,
    artifacts: Vec<BackupArtifact>,
}

/// JSON-file backed artifact catalog.
///
/// The whole catalog is rewritten atomically on every mutation, so a reader
/// never observes a half-written file after a crash.
pub struct FsBackupCatalog {
    path: PathBuf,
    artifacts: Mutex<Vec<BackupArtifact>>,
}

impl FsBackupCatalog {
    /// Open the catalog at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let artifacts = match std::fs::read(&path) {
            Ok(bytes) => {
                let file: CatalogFile = serde_json::from_slice(&bytes)?;
                file.artifacts
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(StorageError::Io(e)),
        };
        Ok(Self {
            path,
            artifacts: Mutex::new(artifacts),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, artifacts: &[BackupArtifact]) -> StorageResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let target = self.path.clone();

        let file = CatalogFile {
            schema_version: CATALOG_SCHEMA_VERSION,
            artifacts: artifacts.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&json)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        Ok(())
    }
}

#[async_trait]
impl BackupCatalog for FsBackupCatalog {
    async fn append(&self, artifact: BackupArtifact) -> StorageResult<()> {
        let mut artifacts = self.artifacts.lock().await;
        if artifacts.iter().any(|a| a.id == artifact.id) {
            return Err(StorageError::DuplicateArtifact {
                id: artifact.id.to_string(),
            });
        }
        let mut next = artifacts.clone();
        next.push(artifact);
        sort_oldest_first(&mut next);
        self.persist(&next).await?;
        *artifacts = next;
        debug!(path = %self.path.display(), entries = artifacts.len(), "catalog appended");
        Ok(())
    }

    async fn remove(&self, id: &ArtifactId) -> StorageResult<()> {
        let mut artifacts = self.artifacts.lock().await;
        if !artifacts.iter().any(|a| &a.id == id) {
            return Err(StorageError::ArtifactNotFound { id: id.to_string() });
        }
        let next: Vec<BackupArtifact> = artifacts.iter().filter(|a| &a.id != id).cloned().collect();
        self.persist(&next).await?;
        *artifacts = next;
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<BackupArtifact>> {
        Ok(self.artifacts.lock().await.clone())
    }
}
