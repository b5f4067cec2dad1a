//! Structured lifecycle events.
//!
//! Every event carries an `event` field so log pipelines can filter on it.

use tracing::{info, warn};

use crate::domain::{EngineStatus, OverallStatus, RunAction, ScanCategory};

/// Span tagging every line of one run with its id.
///
/// Attach with `tracing::Instrument` so the run future stays `Send`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("upkeep.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, actions: &[RunAction], scheduled: bool) {
    let actions = actions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    info!(event = "run.started", run_id = %run_id, actions = %actions, scheduled = scheduled);
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, status: OverallStatus, cancelled: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        status = %status,
        cancelled = cancelled,
    );
}

pub fn emit_engine_finished(action: RunAction, status: EngineStatus, duration_ms: u64) {
    info!(
        event = "engine.finished",
        engine = %action,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_update_applied(package: &str, from: &str, to: &str) {
    info!(event = "update.applied", package = %package, from = %from, to = %to);
}

pub fn emit_update_rolled_back(package: &str, restored: &str, reason: &str) {
    warn!(
        event = "update.rolled_back",
        package = %package,
        restored = %restored,
        reason = %reason,
    );
}

pub fn emit_update_failed(package: &str, error: &dyn std::fmt::Display) {
    warn!(event = "update.failed", package = %package, error = %error);
}

pub fn emit_scan_category_failed(category: ScanCategory, error: &dyn std::fmt::Display) {
    warn!(event = "scan.category_failed", category = %category, error = %error);
}

pub fn emit_backup_created(artifact_id: &str, size_bytes: u64, granularity: &str) {
    info!(
        event = "backup.created",
        artifact_id = %artifact_id,
        size_bytes = size_bytes,
        granularity = %granularity,
    );
}

pub fn emit_backup_pruned(removed: usize, failed: usize, orphans: usize) {
    info!(event = "backup.pruned", removed = removed, failed = failed, orphans = orphans);
}

pub fn emit_notify_failed(channel: &str, error: &dyn std::fmt::Display) {
    warn!(event = "notify.failed", channel = %channel, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _entered = run_span("run-test").entered();
        emit_run_started("run-test", &[RunAction::Update, RunAction::Backup], false);
        emit_engine_finished(RunAction::Scan, EngineStatus::Degraded, 12);
    }
}
