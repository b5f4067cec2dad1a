//! Run requests and the aggregated run report.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use upkeep_state::{BackupArtifact, Granularity, StorageLocation};

use super::package::{Analysis, UpdateOutcome};
use super::scan::SecurityReport;
use crate::orchestrator::RunState;

/// Actions a run can perform, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAction {
    Update,
    Scan,
    Backup,
}

impl fmt::Display for RunAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunAction::Update => "update",
            RunAction::Scan => "scan",
            RunAction::Backup => "backup",
        })
    }
}

/// What started the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunTrigger {
    /// Explicit invocation; every requested action runs.
    Manual,
    /// Timer-driven invocation; backups only run when the schedule says so.
    Scheduled { now: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub actions: BTreeSet<RunAction>,
    pub trigger: RunTrigger,
    /// Overrides the bucket a backup is filed under.
    pub backup_granularity: Option<Granularity>,
}

impl RunRequest {
    pub fn manual(actions: impl IntoIterator<Item = RunAction>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            trigger: RunTrigger::Manual,
            backup_granularity: None,
        }
    }

    pub fn scheduled(actions: impl IntoIterator<Item = RunAction>, now: DateTime<Utc>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            trigger: RunTrigger::Scheduled { now },
            backup_granularity: None,
        }
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.backup_granularity = Some(granularity);
        self
    }

    pub fn requests(&self, action: RunAction) -> bool {
        self.actions.contains(&action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverallStatus::Success => "success",
            OverallStatus::Partial => "partial",
            OverallStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Succeeded,
    /// The engine ran but at least one item failed.
    Degraded,
    Failed,
    Skipped,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineStatus::Succeeded => "succeeded",
            EngineStatus::Degraded => "degraded",
            EngineStatus::Failed => "failed",
            EngineStatus::Skipped => "skipped",
        })
    }
}

/// Result of one engine invocation within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineOutcome<T> {
    Succeeded { result: T },
    Degraded { result: T },
    Failed { error: String },
    Skipped { reason: String },
}

impl<T> EngineOutcome<T> {
    pub fn completed(result: T, degraded: bool) -> Self {
        if degraded {
            EngineOutcome::Degraded { result }
        } else {
            EngineOutcome::Succeeded { result }
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        EngineOutcome::Failed {
            error: error.to_string(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        EngineOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> EngineStatus {
        match self {
            EngineOutcome::Succeeded { .. } => EngineStatus::Succeeded,
            EngineOutcome::Degraded { .. } => EngineStatus::Degraded,
            EngineOutcome::Failed { .. } => EngineStatus::Failed,
            EngineOutcome::Skipped { .. } => EngineStatus::Skipped,
        }
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            EngineOutcome::Succeeded { result } | EngineOutcome::Degraded { result } => {
                Some(result)
            }
            _ => None,
        }
    }
}

/// Dependency engine section of a run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub analysis: Analysis,
    pub outcomes: Vec<UpdateOutcome>,
}

impl UpdateSummary {
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.applied && !o.rolled_back)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn rolled_back_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.rolled_back).count()
    }

    /// Whether any package-level problem occurred.
    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0 || !self.analysis.issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneFailure {
    pub artifact: BackupArtifact,
    pub error: String,
}

/// Result of one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    /// Removed artifacts, bucket by bucket, oldest first within a bucket.
    pub removed: Vec<BackupArtifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<PruneFailure>,
    /// Stored payloads with no catalog entry; reported, never deleted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orphans: Vec<StorageLocation>,
}

/// Backup engine section of a run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub artifact: BackupArtifact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune: Option<PruneReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_error: Option<String>,
}

impl BackupSummary {
    pub fn has_failures(&self) -> bool {
        self.prune_error.is_some() || self.prune.as_ref().map_or(false, |p| !p.failed.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFailure {
    pub channel: String,
    pub error: String,
}

/// Result of handing a run report to the notifier. Never affects run status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotifyOutcome {
    Delivered {
        channels: Vec<String>,
    },
    Partial {
        delivered: Vec<String>,
        failed: Vec<ChannelFailure>,
    },
    Skipped {
        reason: String,
    },
}

/// Everything that happened during one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub trigger: RunTrigger,
    pub requested: Vec<RunAction>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub overall_status: OverallStatus,
    pub final_state: RunState,
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<EngineOutcome<UpdateSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<EngineOutcome<SecurityReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<EngineOutcome<BackupSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotifyOutcome>,
}

impl RunReport {
    /// Status of each requested engine, in execution order.
    pub fn engine_statuses(&self) -> Vec<(RunAction, EngineStatus)> {
        let mut statuses = Vec::new();
        if let Some(update) = &self.update {
            statuses.push((RunAction::Update, update.status()));
        }
        if let Some(scan) = &self.scan {
            statuses.push((RunAction::Scan, scan.status()));
        }
        if let Some(backup) = &self.backup {
            statuses.push((RunAction::Backup, backup.status()));
        }
        statuses
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Combine engine statuses into the run status.
///
/// `Failed` only when every requested engine failed; `Success` only when
/// none failed or degraded and the run was not cancelled.
pub fn overall_status(statuses: &[EngineStatus], cancelled: bool) -> OverallStatus {
    if statuses.is_empty() {
        return if cancelled {
            OverallStatus::Partial
        } else {
            OverallStatus::Success
        };
    }
    if statuses.iter().all(|s| *s == EngineStatus::Failed) {
        return OverallStatus::Failed;
    }
    if cancelled {
        return OverallStatus::Partial;
    }
    if statuses
        .iter()
        .all(|s| matches!(s, EngineStatus::Succeeded | EngineStatus::Skipped))
    {
        OverallStatus::Success
    } else {
        OverallStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_status_rules() {
        use EngineStatus::*;
        assert_eq!(overall_status(&[Succeeded, Succeeded], false), OverallStatus::Success);
        assert_eq!(overall_status(&[Succeeded, Skipped], false), OverallStatus::Success);
        assert_eq!(overall_status(&[Succeeded, Degraded], false), OverallStatus::Partial);
        assert_eq!(overall_status(&[Failed, Succeeded], false), OverallStatus::Partial);
        assert_eq!(overall_status(&[Failed, Failed], false), OverallStatus::Failed);
        assert_eq!(overall_status(&[Failed], true), OverallStatus::Failed);
        assert_eq!(overall_status(&[Succeeded, Skipped], true), OverallStatus::Partial);
        assert_eq!(overall_status(&[], false), OverallStatus::Success);
    }

    #[test]
    fn test_engine_outcome_status() {
        let ok: EngineOutcome<u8> = EngineOutcome::completed(1, false);
        assert_eq!(ok.status(), EngineStatus::Succeeded);
        assert_eq!(ok.result(), Some(&1));

        let degraded: EngineOutcome<u8> = EngineOutcome::completed(1, true);
        assert_eq!(degraded.status(), EngineStatus::Degraded);

        let failed: EngineOutcome<u8> = EngineOutcome::failed("boom");
        assert_eq!(failed.status(), EngineStatus::Failed);
        assert!(failed.result().is_none());
    }

    #[test]
    fn test_engine_outcome_serializes_with_status_tag() {
        let outcome: EngineOutcome<u8> = EngineOutcome::skipped("not due");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "not due");
    }

    #[test]
    fn test_request_builders() {
        let req = RunRequest::manual([RunAction::Backup, RunAction::Update])
            .with_granularity(Granularity::Monthly);
        assert!(req.requests(RunAction::Update));
        assert!(!req.requests(RunAction::Scan));
        assert_eq!(
            req.actions.iter().copied().collect::<Vec<_>>(),
            vec![RunAction::Update, RunAction::Backup]
        );
    }
}
