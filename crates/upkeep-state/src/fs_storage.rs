use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{ContentDigest, StorageBackend, StorageLocation, StorageResult};

const PAYLOAD_EXTENSION: &str = "bak";

/// Filesystem-backed payload store.
///
/// Layout: `<root>/<key>.bak`. Writes are atomic (temp file in the same
/// directory, then rename), so a crash never leaves a truncated payload under
/// its final name.
pub struct FsStorageBackend {
    root: PathBuf,
}

impl FsStorageBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn payload_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(format!("{key}.{PAYLOAD_EXTENSION}")))
    }

    fn resolve(&self, location: &StorageLocation) -> StorageResult<PathBuf> {
        let path = PathBuf::from(location.as_str());
        if path.parent() != Some(self.root.as_path()) {
            return Err(StorageError::InvalidKey {
                key: location.to_string(),
            });
        }
        Ok(path)
    }
}

#[async_trait]
impl StorageBackend for FsStorageBackend {
    async fn write(&self, key: &str, payload: &[u8]) -> StorageResult<StorageLocation> {
        let path = self.payload_path(key)?;
        let root = self.root.clone();
        let data = payload.to_vec();
        let target = path.clone();

        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            let mut tmp = NamedTempFile::new_in(&root)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        debug!(path = %path.display(), bytes = payload.len(), "payload written");
        Ok(StorageLocation(path.to_string_lossy().into_owned()))
    }

    async fn verify(
        &self,
        location: &StorageLocation,
        expected: &ContentDigest,
    ) -> StorageResult<bool> {
        let path = self.resolve(location)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(ContentDigest::from_bytes(&bytes) == *expected),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn delete(&self, location: &StorageLocation) -> StorageResult<()> {
        let path = self.resolve(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<StorageLocation>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut locations = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != PAYLOAD_EXTENSION) {
                continue;
            }
            let matches = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map_or(false, |stem| stem.starts_with(prefix));
            if matches {
                locations.push(StorageLocation(path.to_string_lossy().into_owned()));
            }
        }
        locations.sort();
        Ok(locations)
    }
}
