//! Run orchestration: fixed engine order, per-engine isolation, one report.

mod state;

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{warn, Instrument};
use upkeep_state::Granularity;

use crate::backup::BackupEngine;
use crate::cancel::CancelToken;
use crate::dependency::DependencyEngine;
use crate::domain::report::overall_status;
use crate::domain::{
    BackupSummary, EngineOutcome, PolicyModel, Result, RunAction, RunReport, RunRequest,
    RunTrigger, SecurityReport, UpdateSummary,
};
use crate::notifier::Notifier;
use crate::obs;
use crate::schedule::scheduled_granularity;
use crate::security::SecurityScanner;

pub use state::{InvalidTransition, RunState};

/// The single entry point that runs maintenance against a policy.
///
/// Engines are optional so callers can wire only what they use; requesting an
/// action whose engine is missing fails that engine, not the run.
pub struct Orchestrator {
    policy: PolicyModel,
    dependency: Option<DependencyEngine>,
    security: Option<SecurityScanner>,
    backup: Option<BackupEngine>,
    /// Why the backup engine could not be built, when it could not.
    backup_unavailable: Option<String>,
    notifier: Option<Notifier>,
    cancel: CancelToken,
}

impl Orchestrator {
    /// Validate `policy` and take ownership of it for every future run.
    pub fn new(policy: PolicyModel) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            dependency: None,
            security: None,
            backup: None,
            backup_unavailable: None,
            notifier: None,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_dependency_engine(mut self, engine: DependencyEngine) -> Self {
        self.dependency = Some(engine);
        self
    }

    pub fn with_security_scanner(mut self, scanner: SecurityScanner) -> Self {
        self.security = Some(scanner);
        self
    }

    pub fn with_backup_engine(mut self, engine: BackupEngine) -> Self {
        self.backup = Some(engine);
        self.backup_unavailable = None;
        self
    }

    /// Record that the backup engine could not be constructed. A requested
    /// backup then fails with `reason` while the other engines still run.
    pub fn with_backup_unavailable(mut self, reason: impl Into<String>) -> Self {
        self.backup = None;
        self.backup_unavailable = Some(reason.into());
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Token that cancels the current and any later run on this orchestrator.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn policy(&self) -> &PolicyModel {
        &self.policy
    }

    pub fn dependency_engine(&self) -> Option<&DependencyEngine> {
        self.dependency.as_ref()
    }

    pub fn backup_engine(&self) -> Option<&BackupEngine> {
        self.backup.as_ref()
    }

    /// Run the requested actions in the order update, scan, backup.
    ///
    /// Never fails: every engine error is captured in its report section.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        let span = obs::run_span(&run_id);
        self.run_inner(run_id, request).instrument(span).await
    }

    async fn run_inner(&self, run_id: String, request: RunRequest) -> RunReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut state = step(RunState::Idle, RunState::Running);
        let requested: Vec<RunAction> = request.actions.iter().copied().collect();
        obs::emit_run_started(
            &run_id,
            &requested,
            matches!(request.trigger, RunTrigger::Scheduled { .. }),
        );

        let update = if request.requests(RunAction::Update) {
            Some(self.timed(RunAction::Update, self.run_update()).await)
        } else {
            None
        };
        let scan = if request.requests(RunAction::Scan) {
            Some(self.timed(RunAction::Scan, self.run_scan()).await)
        } else {
            None
        };
        let backup = if request.requests(RunAction::Backup) {
            Some(self.timed(RunAction::Backup, self.run_backup(&request)).await)
        } else {
            None
        };

        let cancelled = self.cancel.is_cancelled();
        let statuses: Vec<_> = [
            update.as_ref().map(EngineOutcome::status),
            scan.as_ref().map(EngineOutcome::status),
            backup.as_ref().map(EngineOutcome::status),
        ]
        .into_iter()
        .flatten()
        .collect();
        let overall = overall_status(&statuses, cancelled);
        state = step(state, RunState::terminal_for(overall));

        let mut report = RunReport {
            run_id,
            trigger: request.trigger,
            requested,
            started_at,
            finished_at: Utc::now(),
            overall_status: overall,
            final_state: state,
            cancelled,
            update,
            scan,
            backup,
            notification: None,
        };

        if let Some(notifier) = &self.notifier {
            let outcome = notifier
                .notify(&report, self.policy.security.notification_threshold)
                .await;
            report.notification = Some(outcome);
        }

        obs::emit_run_finished(
            &report.run_id,
            clock.elapsed().as_millis() as u64,
            report.overall_status,
            report.cancelled,
        );
        report
    }

    async fn timed<T>(
        &self,
        action: RunAction,
        fut: impl std::future::Future<Output = EngineOutcome<T>>,
    ) -> EngineOutcome<T> {
        let clock = Instant::now();
        let outcome = fut.await;
        obs::emit_engine_finished(action, outcome.status(), clock.elapsed().as_millis() as u64);
        outcome
    }

    async fn run_update(&self) -> EngineOutcome<UpdateSummary> {
        if self.cancel.is_cancelled() {
            return EngineOutcome::skipped("run cancelled");
        }
        let Some(engine) = &self.dependency else {
            return EngineOutcome::failed("dependency engine not configured");
        };
        match engine.update(&self.policy.dependencies, &self.cancel).await {
            Ok(summary) => {
                let degraded = summary.has_failures();
                EngineOutcome::completed(summary, degraded)
            }
            Err(e) => EngineOutcome::failed(e),
        }
    }

    async fn run_scan(&self) -> EngineOutcome<SecurityReport> {
        if self.cancel.is_cancelled() {
            return EngineOutcome::skipped("run cancelled");
        }
        let Some(scanner) = &self.security else {
            return EngineOutcome::failed("security scanner not configured");
        };
        let report = scanner.scan(&self.policy.security.scan_categories).await;
        let degraded = !report.unavailable_categories().is_empty();
        EngineOutcome::completed(report, degraded)
    }

    async fn run_backup(&self, request: &RunRequest) -> EngineOutcome<BackupSummary> {
        if self.cancel.is_cancelled() {
            return EngineOutcome::skipped("run cancelled");
        }
        if !self.policy.backup.enabled {
            return EngineOutcome::skipped("backups disabled by policy");
        }
        let Some(engine) = &self.backup else {
            return match &self.backup_unavailable {
                Some(reason) => {
                    EngineOutcome::failed(format!("backup engine unavailable: {reason}"))
                }
                None => EngineOutcome::failed("backup engine not configured"),
            };
        };

        let schedule = &self.policy.backup.schedule;
        let granularity = match request.trigger {
            RunTrigger::Manual => request.backup_granularity.unwrap_or(Granularity::Daily),
            RunTrigger::Scheduled { now } => {
                let last = match engine.latest(None).await {
                    Ok(latest) => latest.map(|a| a.created_at),
                    Err(e) => return EngineOutcome::failed(e),
                };
                if !schedule.is_due(last, now) {
                    let next = last.map_or_else(
                        || "today".to_string(),
                        |l| schedule.next_run_after(l).to_rfc3339(),
                    );
                    return EngineOutcome::skipped(format!("not due (next run {next})"));
                }
                match request.backup_granularity {
                    Some(granularity) => granularity,
                    None => match scheduled_bucket(engine, now).await {
                        Ok(granularity) => granularity,
                        Err(e) => return EngineOutcome::failed(e),
                    },
                }
            }
        };

        match engine.run(granularity, &self.policy.backup.retention).await {
            Ok(summary) => {
                let degraded = summary.has_failures();
                EngineOutcome::completed(summary, degraded)
            }
            Err(e) => EngineOutcome::failed(e),
        }
    }
}

/// Bucket for a scheduled backup, from the newest monthly and weekly artifacts.
async fn scheduled_bucket(engine: &BackupEngine, now: DateTime<Utc>) -> Result<Granularity> {
    let monthly = engine.latest(Some(Granularity::Monthly)).await?;
    let weekly = engine.latest(Some(Granularity::Weekly)).await?;
    Ok(scheduled_granularity(
        now,
        monthly.map(|a| a.created_at),
        weekly.map(|a| a.created_at),
    ))
}

fn step(from: RunState, to: RunState) -> RunState {
    match from.advance(to) {
        Ok(next) => next,
        Err(e) => {
            warn!(error = %e, "Ignoring run state transition");
            from
        }
    }
}
