//! Retention planning, independent per granularity bucket.

use std::cmp::Ordering;

use upkeep_state::{BackupArtifact, Granularity};

use crate::domain::RetentionPolicy;

fn newest_first(a: &BackupArtifact, b: &BackupArtifact) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Artifacts to remove so each bucket keeps its `retention` count of the most
/// recent verified artifacts.
///
/// Unverified entries never count toward what is kept. Buckets appear in
/// `Granularity::ALL` order, each oldest first.
pub fn plan_prune(
    artifacts: &[BackupArtifact],
    retention: &RetentionPolicy,
) -> Vec<BackupArtifact> {
    let mut doomed = Vec::new();
    for granularity in Granularity::ALL {
        let mut bucket: Vec<&BackupArtifact> = artifacts
            .iter()
            .filter(|a| a.granularity == granularity)
            .collect();
        bucket.sort_by(|a, b| newest_first(a, b));

        let keep = retention.keep(granularity);
        let mut kept = 0usize;
        let mut removed: Vec<BackupArtifact> = Vec::new();
        for artifact in bucket {
            if artifact.verified && kept < keep {
                kept += 1;
            } else {
                removed.push(artifact.clone());
            }
        }
        removed.reverse();
        doomed.extend(removed);
    }
    doomed
}
