//! Storage trait definitions for Upkeep
//!
//! These traits define the persistence seams of the backup lifecycle:
//! - `StorageBackend`: where backup payloads live (write/verify/delete/list)
//! - `BackupCatalog`: durable artifact metadata (append-only except pruning)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Artifact records
// ---------------------------------------------------------------------------

/// Opaque location of a stored payload, as returned by `StorageBackend::write`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageLocation(pub String);

impl StorageLocation {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier of a backup artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    /// Build an id from granularity, creation time and payload digest.
    ///
    /// Format: `<granularity>-<YYYYmmddTHHMMSS.nnnnnnnnnZ>-<12 hex>`.
    pub fn derive(
        granularity: Granularity,
        created_at: DateTime<Utc>,
        digest: &ContentDigest,
    ) -> Self {
        ArtifactId(format!(
            "{}-{}-{}",
            granularity,
            created_at.format("%Y%m%dT%H%M%S%.9fZ"),
            digest.short()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backup retention bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    /// All buckets in declaration order.
    pub const ALL: [Granularity; 3] =
        [Granularity::Daily, Granularity::Weekly, Granularity::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Granularity::Daily),
            "weekly" => Ok(Granularity::Weekly),
            "monthly" => Ok(Granularity::Monthly),
            other => Err(format!("unknown granularity: {other}")),
        }
    }
}

/// A backup snapshot as recorded in the catalog.
///
/// Only verified artifacts are ever cataloged; once cataloged an artifact is
/// immutable and can only be removed by retention pruning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub id: ArtifactId,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub granularity: Granularity,
    pub verified: bool,
    pub storage_location: StorageLocation,
    pub digest: ContentDigest,
}

// ---------------------------------------------------------------------------
// StorageBackend
// ---------------------------------------------------------------------------

/// Backup payload store.
///
/// Guarantees:
/// - `write(key, data)` stores the exact bytes and returns where they live.
/// - `verify(location, digest)` is `true` only if the stored bytes hash to `digest`.
/// - `delete` of a missing location is a no-op.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store a payload under `key` and return its location.
    async fn write(&self, key: &str, payload: &[u8]) -> StorageResult<StorageLocation>;

    /// Check the stored payload against the expected digest.
    async fn verify(
        &self,
        location: &StorageLocation,
        expected: &ContentDigest,
    ) -> StorageResult<bool>;

    /// Remove a stored payload. No-op if absent.
    async fn delete(&self, location: &StorageLocation) -> StorageResult<()>;

    /// List stored locations whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<StorageLocation>>;
}

// ---------------------------------------------------------------------------
// BackupCatalog
// ---------------------------------------------------------------------------

/// Durable artifact catalog.
#[async_trait]
pub trait BackupCatalog: Send + Sync {
    /// Record a verified artifact. Fails with `DuplicateArtifact` if the id exists.
    async fn append(&self, artifact: BackupArtifact) -> StorageResult<()>;

    /// Remove an artifact entry. Fails with `ArtifactNotFound` if absent.
    async fn remove(&self, id: &ArtifactId) -> StorageResult<()>;

    /// All cataloged artifacts, oldest first.
    async fn list(&self) -> StorageResult<Vec<BackupArtifact>>;

    /// Most recent artifact, optionally restricted to one bucket.
    async fn latest(
        &self,
        granularity: Option<Granularity>,
    ) -> StorageResult<Option<BackupArtifact>> {
        let artifacts = self.list().await?;
        Ok(artifacts
            .into_iter()
            .filter(|a| granularity.map_or(true, |g| a.granularity == g))
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))))
    }
}

/// Sort artifacts oldest first with id as a deterministic tie-break.
pub(crate) fn sort_oldest_first(artifacts: &mut [BackupArtifact]) {
    artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
