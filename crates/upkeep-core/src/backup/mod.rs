//! Backup lifecycle: capture, store, verify, catalog, and retention pruning.

pub mod retention;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use upkeep_state::{
    ArtifactId, BackupArtifact, BackupCatalog, ContentDigest, Granularity, StorageBackend,
    StorageError, StorageLocation,
};

use crate::collaborators::SnapshotSource;
use crate::domain::{
    BackupSummary, PruneFailure, PruneReport, Result, RetentionPolicy, Timeouts, UpkeepError,
};
use crate::obs;
use crate::timeout::with_timeout;

pub use retention::plan_prune;

pub struct BackupEngine {
    source: Arc<dyn SnapshotSource>,
    storage: Arc<dyn StorageBackend>,
    catalog: Arc<dyn BackupCatalog>,
    timeouts: Timeouts,
    /// Shared for creation, exclusive for pruning.
    storage_lock: RwLock<()>,
}

async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, StorageError>>,
{
    with_timeout(operation, limit, async { fut.await.map_err(UpkeepError::from) }).await
}

impl BackupEngine {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        storage: Arc<dyn StorageBackend>,
        catalog: Arc<dyn BackupCatalog>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            source,
            storage,
            catalog,
            timeouts,
            storage_lock: RwLock::new(()),
        }
    }

    /// Capture, store and verify one backup, then record it in the catalog.
    ///
    /// A payload that fails verification (or cannot be cataloged) is deleted
    /// again; only verified artifacts are ever returned or cataloged.
    pub async fn create_backup(&self, granularity: Granularity) -> Result<BackupArtifact> {
        let payload = with_timeout(
            "snapshot capture",
            self.timeouts.snapshot,
            self.source.capture(),
        )
        .await?;

        let created_at = Utc::now();
        let digest = ContentDigest::from_bytes(&payload);
        let id = ArtifactId::derive(granularity, created_at, &digest);

        let _shared = self.storage_lock.read().await;
        let location = bounded(
            "backup write",
            self.timeouts.storage,
            self.storage.write(id.as_str(), &payload),
        )
        .await?;

        let check = bounded(
            "backup verify",
            self.timeouts.storage,
            self.storage.verify(&location, &digest),
        )
        .await;
        let failure = match check {
            Ok(true) => None,
            Ok(false) => Some("stored payload does not match its digest".to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(detail) = failure {
            self.discard(&location).await;
            return Err(UpkeepError::Verification {
                location: location.to_string(),
                detail,
            });
        }

        let artifact = BackupArtifact {
            id,
            created_at,
            size_bytes: payload.len() as u64,
            granularity,
            verified: true,
            storage_location: location,
            digest,
        };

        if let Err(e) = bounded(
            "catalog append",
            self.timeouts.storage,
            self.catalog.append(artifact.clone()),
        )
        .await
        {
            self.discard(&artifact.storage_location).await;
            return Err(e);
        }

        obs::emit_backup_created(
            artifact.id.as_str(),
            artifact.size_bytes,
            granularity.as_str(),
        );
        Ok(artifact)
    }

    async fn discard(&self, location: &StorageLocation) {
        if let Err(e) = bounded(
            "backup discard",
            self.timeouts.storage,
            self.storage.delete(location),
        )
        .await
        {
            warn!(location = %location, error = %e, "Failed to discard uncataloged payload");
        }
    }

    /// Apply retention to every bucket.
    ///
    /// Each doomed artifact's payload is deleted before its catalog entry, so
    /// an interrupted pass is finished by the next one. Per-artifact failures
    /// are collected; only an unreadable catalog fails the whole pass.
    pub async fn prune(&self, retention: &RetentionPolicy) -> Result<PruneReport> {
        let _exclusive = self.storage_lock.write().await;
        let artifacts = bounded("catalog list", self.timeouts.storage, self.catalog.list()).await?;
        let doomed = plan_prune(&artifacts, retention);

        let mut report = PruneReport::default();
        for artifact in doomed {
            let removal = async {
                bounded(
                    "backup delete",
                    self.timeouts.storage,
                    self.storage.delete(&artifact.storage_location),
                )
                .await?;
                bounded(
                    "catalog remove",
                    self.timeouts.storage,
                    self.catalog.remove(&artifact.id),
                )
                .await
            };
            let result = removal.await;
            match result {
                Ok(()) => report.removed.push(artifact),
                Err(e) => {
                    warn!(artifact_id = %artifact.id, error = %e, "Prune of artifact failed");
                    report.failed.push(PruneFailure {
                        artifact,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.orphans = self.find_orphans().await;
        obs::emit_backup_pruned(report.removed.len(), report.failed.len(), report.orphans.len());
        Ok(report)
    }

    /// Stored payloads with no catalog entry. Listing failures yield none.
    async fn find_orphans(&self) -> Vec<StorageLocation> {
        let listing = async {
            let stored =
                bounded("storage list", self.timeouts.storage, self.storage.list("")).await?;
            let cataloged: BTreeSet<StorageLocation> =
                bounded("catalog list", self.timeouts.storage, self.catalog.list())
                    .await?
                    .into_iter()
                    .map(|a| a.storage_location)
                    .collect();
            Ok::<_, UpkeepError>(
                stored
                    .into_iter()
                    .filter(|loc| !cataloged.contains(loc))
                    .collect::<Vec<_>>(),
            )
        };
        match listing.await {
            Ok(orphans) => orphans,
            Err(e) => {
                warn!(error = %e, "Could not check storage for orphaned payloads");
                Vec::new()
            }
        }
    }

    /// Create a backup, then prune. A prune failure is reported, not raised.
    pub async fn run(
        &self,
        granularity: Granularity,
        retention: &RetentionPolicy,
    ) -> Result<BackupSummary> {
        let artifact = self.create_backup(granularity).await?;
        let (prune, prune_error) = match self.prune(retention).await {
            Ok(report) => (Some(report), None),
            Err(e) => (None, Some(e.to_string())),
        };
        info!(artifact_id = %artifact.id, "Backup run complete");
        Ok(BackupSummary {
            artifact,
            prune,
            prune_error,
        })
    }

    pub async fn latest(&self, granularity: Option<Granularity>) -> Result<Option<BackupArtifact>> {
        bounded(
            "catalog latest",
            self.timeouts.storage,
            self.catalog.latest(granularity),
        )
        .await
    }

    /// Cataloged artifacts, oldest first.
    pub async fn artifacts(&self) -> Result<Vec<BackupArtifact>> {
        bounded("catalog list", self.timeouts.storage, self.catalog.list()).await
    }
}
