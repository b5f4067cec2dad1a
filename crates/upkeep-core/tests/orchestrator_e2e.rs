//! Whole runs through the orchestrator with scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use upkeep_core::backup::BackupEngine;
use upkeep_core::dependency::DependencyEngine;
use upkeep_core::fakes::{
    FakeProject, RecordingTransport, ScriptedScanAdapter, StaticSnapshotSource,
};
use upkeep_core::{
    CancelToken, EngineOutcome, EngineStatus, Granularity, NotifyOutcome, Notifier,
    Orchestrator, OverallStatus, PolicyModel, Result, RunAction, RunRequest, RunState,
    ScanCategory, ScanFinding, SecurityScanner, Severity, TestResult, TestRunner, TestVerdict,
    Timeouts, UpkeepError,
};
use upkeep_state::fakes::{MemoryBackupCatalog, MemoryStorageBackend};
use upkeep_state::{ArtifactId, BackupArtifact, ContentDigest, StorageLocation};

fn timeouts() -> Timeouts {
    Timeouts::uniform(Duration::from_secs(5))
}

fn project() -> Arc<FakeProject> {
    Arc::new(
        FakeProject::new()
            .with_package("certifi", "2024.2.2", "2024.2.3")
            .with_package("flask", "3.0.0", "3.0.1")
            .breaks_tests_at("flask", "3.0.1"),
    )
}

fn dependency_engine(project: &Arc<FakeProject>) -> DependencyEngine {
    DependencyEngine::new(project.clone(), project.clone(), project.clone(), timeouts())
}

fn scanner() -> SecurityScanner {
    SecurityScanner::new(Duration::from_secs(5))
        .with_adapter(Arc::new(ScriptedScanAdapter::findings(
            ScanCategory::DependencyVulnerabilities,
            vec![ScanFinding::new(
                ScanCategory::DependencyVulnerabilities,
                Severity::High,
                "werkzeug debugger RCE",
            )],
        )))
        .with_adapter(Arc::new(ScriptedScanAdapter::unavailable(
            ScanCategory::SecretScanning,
            "trufflehog missing",
        )))
        .with_adapter(Arc::new(ScriptedScanAdapter::findings(
            ScanCategory::CodeSecurityIssues,
            vec![ScanFinding::new(
                ScanCategory::CodeSecurityIssues,
                Severity::Medium,
                "subprocess with shell=True",
            )
            .at("app/tasks.py:42")],
        )))
}

fn scan_policy() -> PolicyModel {
    let mut policy = PolicyModel::default();
    policy.security.scan_categories = [
        ScanCategory::DependencyVulnerabilities,
        ScanCategory::CodeSecurityIssues,
        ScanCategory::SecretScanning,
    ]
    .into_iter()
    .collect();
    policy
}

fn backup_engine(storage: Arc<MemoryStorageBackend>) -> BackupEngine {
    BackupEngine::new(
        Arc::new(StaticSnapshotSource::new("post-update state")),
        storage,
        Arc::new(MemoryBackupCatalog::new()),
        timeouts(),
    )
}

#[tokio::test]
async fn test_update_and_scan_with_partial_failures() {
    let project = project();
    let transport = Arc::new(RecordingTransport::new("slack"));
    let orchestrator = Orchestrator::new(scan_policy())
        .unwrap()
        .with_dependency_engine(dependency_engine(&project))
        .with_security_scanner(scanner())
        .with_notifier(Notifier::new(vec![transport.clone()], Duration::from_secs(1)));

    let report = orchestrator
        .run(RunRequest::manual([RunAction::Update, RunAction::Scan]))
        .await;

    assert_eq!(report.overall_status, OverallStatus::Partial);
    assert_eq!(report.final_state, RunState::PartiallyFailed);
    assert!(report.backup.is_none());

    let update = report.update.as_ref().unwrap();
    assert_eq!(update.status(), EngineStatus::Degraded);
    let summary = update.result().unwrap();
    let flask = summary
        .outcomes
        .iter()
        .find(|o| o.decision.candidate.name == "flask")
        .unwrap();
    assert!(flask.rolled_back);
    assert!(flask.applied);
    assert_eq!(flask.test_result, TestResult::Failed);
    let certifi = summary
        .outcomes
        .iter()
        .find(|o| o.decision.candidate.name == "certifi")
        .unwrap();
    assert!(certifi.applied);
    assert_eq!(certifi.test_result, TestResult::Passed);
    assert!(!certifi.rolled_back);

    let scan = report.scan.as_ref().unwrap();
    assert_eq!(scan.status(), EngineStatus::Degraded);
    let security = scan.result().unwrap();
    let descriptions: Vec<_> = security.findings.iter().map(|f| f.description.as_str()).collect();
    assert_eq!(descriptions[0], "werkzeug debugger RCE");
    assert_eq!(descriptions[1], "subprocess with shell=True");
    assert_eq!(security.findings[2].severity, Severity::Info);
    assert!(descriptions[2].contains("secret_scanning scan could not run"));
    assert_eq!(security.overall_score, 100 - 10 - 4);

    match report.notification.as_ref().unwrap() {
        NotifyOutcome::Delivered { channels } => assert_eq!(channels, &vec!["slack".to_string()]),
        other => panic!("unexpected notify outcome {other:?}"),
    }
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].title.contains("partial"));
    assert!(sent[0].body.contains("flask"));
}

#[tokio::test]
async fn test_all_engines_failing_is_failed() {
    let project = Arc::new(FakeProject::new().listing_unavailable());
    let storage = Arc::new(MemoryStorageBackend::new());
    storage.set_unavailable(true);
    let orchestrator = Orchestrator::new(PolicyModel::default())
        .unwrap()
        .with_dependency_engine(dependency_engine(&project))
        .with_backup_engine(backup_engine(storage));

    let report = orchestrator
        .run(RunRequest::manual([RunAction::Update, RunAction::Backup]))
        .await;

    assert_eq!(report.overall_status, OverallStatus::Failed);
    assert_eq!(report.final_state, RunState::Failed);
    assert!(matches!(report.update, Some(EngineOutcome::Failed { .. })));
    assert!(matches!(report.backup, Some(EngineOutcome::Failed { .. })));
}

#[tokio::test]
async fn test_missing_engine_fails_only_itself() {
    let orchestrator = Orchestrator::new(PolicyModel::default())
        .unwrap()
        .with_security_scanner(scanner());
    let report = orchestrator
        .run(RunRequest::manual([RunAction::Update, RunAction::Scan]))
        .await;

    match report.update.as_ref().unwrap() {
        EngineOutcome::Failed { error } => assert!(error.contains("not configured")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.overall_status, OverallStatus::Partial);
}

#[tokio::test]
async fn test_unavailable_backup_engine_does_not_stop_other_engines() {
    let project = project();
    let orchestrator = Orchestrator::new(scan_policy())
        .unwrap()
        .with_dependency_engine(dependency_engine(&project))
        .with_security_scanner(scanner())
        .with_backup_unavailable("catalog.json: expected value at line 1 column 1");

    let report = orchestrator
        .run(RunRequest::manual([
            RunAction::Update,
            RunAction::Scan,
            RunAction::Backup,
        ]))
        .await;

    assert!(report.update.as_ref().unwrap().result().is_some());
    assert!(report.scan.as_ref().unwrap().result().is_some());
    match report.backup.as_ref().unwrap() {
        EngineOutcome::Failed { error } => {
            assert!(error.contains("backup engine unavailable"));
            assert!(error.contains("catalog.json"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.overall_status, OverallStatus::Partial);
    assert_eq!(report.final_state, RunState::PartiallyFailed);
}

#[tokio::test]
async fn test_clean_run_is_success_and_backup_follows_update() {
    let project = Arc::new(FakeProject::new().with_package("idna", "3.6.0", "3.6.1"));
    let storage = Arc::new(MemoryStorageBackend::new());
    let orchestrator = Orchestrator::new(PolicyModel::default())
        .unwrap()
        .with_dependency_engine(dependency_engine(&project))
        .with_backup_engine(backup_engine(storage.clone()));

    let report = orchestrator
        .run(
            RunRequest::manual([RunAction::Backup, RunAction::Update])
                .with_granularity(Granularity::Monthly),
        )
        .await;

    assert_eq!(report.overall_status, OverallStatus::Success);
    assert_eq!(report.final_state, RunState::Completed);
    assert_eq!(report.requested, vec![RunAction::Update, RunAction::Backup]);
    let backup = report.backup.as_ref().unwrap().result().unwrap();
    assert_eq!(backup.artifact.granularity, Granularity::Monthly);
    assert!(report.update.as_ref().unwrap().result().unwrap().outcomes[0].applied);
    assert_eq!(storage.len(), 1);
    assert!(report.notification.is_none());
}

#[tokio::test]
async fn test_cancelled_before_start_skips_everything() {
    let project = project();
    let orchestrator = Orchestrator::new(scan_policy())
        .unwrap()
        .with_dependency_engine(dependency_engine(&project))
        .with_security_scanner(scanner());
    orchestrator.cancel_token().cancel();

    let report = orchestrator
        .run(RunRequest::manual([RunAction::Update, RunAction::Scan]))
        .await;

    assert!(report.cancelled);
    assert_eq!(report.overall_status, OverallStatus::Partial);
    assert_eq!(report.update.as_ref().unwrap().status(), EngineStatus::Skipped);
    assert_eq!(report.scan.as_ref().unwrap().status(), EngineStatus::Skipped);
    assert!(project.install_log().is_empty());
}

/// Test runner that trips the run's cancel token during the first suite run.
struct CancellingRunner {
    project: Arc<FakeProject>,
    cancel: CancelToken,
}

#[async_trait]
impl TestRunner for CancellingRunner {
    async fn run(&self) -> Result<TestVerdict> {
        self.cancel.cancel();
        self.project.run().await
    }
}

#[tokio::test]
async fn test_cancelled_during_update_skips_later_work() {
    let project = Arc::new(
        FakeProject::new()
            .with_package("alpha", "1.0.0", "1.0.1")
            .with_package("beta", "1.0.0", "1.0.1"),
    );
    let orchestrator = Orchestrator::new(scan_policy()).unwrap();
    let runner = CancellingRunner {
        project: project.clone(),
        cancel: orchestrator.cancel_token(),
    };
    let orchestrator = orchestrator
        .with_dependency_engine(DependencyEngine::new(
            project.clone(),
            project.clone(),
            Arc::new(runner),
            timeouts(),
        ))
        .with_security_scanner(scanner());

    let report = orchestrator
        .run(RunRequest::manual([RunAction::Update, RunAction::Scan]))
        .await;

    assert!(report.cancelled);
    assert_eq!(report.overall_status, OverallStatus::Partial);
    assert_eq!(report.final_state, RunState::PartiallyFailed);
    let outcomes = &report.update.as_ref().unwrap().result().unwrap().outcomes;
    assert!(outcomes[0].applied);
    assert_eq!(outcomes[0].test_result, TestResult::Passed);
    assert_eq!(outcomes[1].skipped_reason.as_deref(), Some("run cancelled"));
    assert_eq!(report.scan.as_ref().unwrap().status(), EngineStatus::Skipped);
    assert_eq!(project.install_log().len(), 1);
}

#[tokio::test]
async fn test_scheduled_backup_not_due_is_skipped_success() {
    let storage = Arc::new(MemoryStorageBackend::new());
    let orchestrator = Orchestrator::new(PolicyModel::default())
        .unwrap()
        .with_backup_engine(backup_engine(storage.clone()));

    // Default schedule fires at 02:00; one in the morning is too early.
    let early = Utc.with_ymd_and_hms(2026, 10, 18, 1, 0, 0).unwrap();
    let report = orchestrator
        .run(RunRequest::scheduled([RunAction::Backup], early))
        .await;

    assert_eq!(report.overall_status, OverallStatus::Success);
    match report.backup.as_ref().unwrap() {
        EngineOutcome::Skipped { reason } => assert!(reason.starts_with("not due")),
        other => panic!("expected skip, got {other:?}"),
    }
    assert!(storage.is_empty());
}

fn cataloged(granularity: Granularity, created_at: DateTime<Utc>) -> BackupArtifact {
    let digest = ContentDigest::from_bytes(granularity.as_str().as_bytes());
    let id = ArtifactId::derive(granularity, created_at, &digest);
    BackupArtifact {
        storage_location: StorageLocation(format!("mem://{id}")),
        id,
        created_at,
        size_bytes: 7,
        granularity,
        verified: true,
        digest,
    }
}

#[tokio::test]
async fn test_first_scheduled_backup_is_monthly() {
    let storage = Arc::new(MemoryStorageBackend::new());
    let orchestrator = Orchestrator::new(PolicyModel::default())
        .unwrap()
        .with_backup_engine(backup_engine(storage.clone()));

    let sunday = Utc.with_ymd_and_hms(2026, 10, 18, 2, 30, 0).unwrap();
    let report = orchestrator
        .run(RunRequest::scheduled([RunAction::Backup], sunday))
        .await;

    let backup = report.backup.as_ref().unwrap().result().unwrap();
    assert_eq!(backup.artifact.granularity, Granularity::Monthly);
    assert_eq!(report.overall_status, OverallStatus::Success);
}

#[tokio::test]
async fn test_scheduled_backup_due_uses_scheduled_bucket() {
    // 2026-10-04, 2026-10-11 and 2026-10-18 are Sundays.
    let catalog = MemoryBackupCatalog::with_artifacts(vec![
        cataloged(Granularity::Monthly, Utc.with_ymd_and_hms(2026, 10, 4, 2, 0, 0).unwrap()),
        cataloged(Granularity::Weekly, Utc.with_ymd_and_hms(2026, 10, 11, 2, 0, 0).unwrap()),
    ]);
    let engine = BackupEngine::new(
        Arc::new(StaticSnapshotSource::new("post-update state")),
        Arc::new(MemoryStorageBackend::new()),
        Arc::new(catalog),
        timeouts(),
    );
    let orchestrator = Orchestrator::new(PolicyModel::default())
        .unwrap()
        .with_backup_engine(engine);

    let sunday = Utc.with_ymd_and_hms(2026, 10, 18, 2, 30, 0).unwrap();
    let report = orchestrator
        .run(RunRequest::scheduled([RunAction::Backup], sunday))
        .await;

    let backup = report.backup.as_ref().unwrap().result().unwrap();
    assert_eq!(backup.artifact.granularity, Granularity::Weekly);
    assert_eq!(report.overall_status, OverallStatus::Success);
}

#[tokio::test]
async fn test_disabled_backups_are_skipped() {
    let mut policy = PolicyModel::default();
    policy.backup.enabled = false;
    let storage = Arc::new(MemoryStorageBackend::new());
    let orchestrator = Orchestrator::new(policy)
        .unwrap()
        .with_backup_engine(backup_engine(storage.clone()));

    let report = orchestrator.run(RunRequest::manual([RunAction::Backup])).await;
    assert_eq!(report.backup.as_ref().unwrap().status(), EngineStatus::Skipped);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_notification_failure_does_not_change_status() {
    let mut policy = PolicyModel::default();
    policy.security.scan_categories = [ScanCategory::CodeSecurityIssues].into_iter().collect();
    let log = Arc::new(RecordingTransport::new("log"));
    let orchestrator = Orchestrator::new(policy)
        .unwrap()
        .with_security_scanner(SecurityScanner::new(Duration::from_secs(5)).with_adapter(
            Arc::new(ScriptedScanAdapter::findings(ScanCategory::CodeSecurityIssues, Vec::new())),
        ))
        .with_notifier(Notifier::new(
            vec![Arc::new(RecordingTransport::failing("slack")), log.clone()],
            Duration::from_secs(1),
        ));

    let report = orchestrator.run(RunRequest::manual([RunAction::Scan])).await;

    assert_eq!(report.overall_status, OverallStatus::Success);
    match report.notification.unwrap() {
        NotifyOutcome::Partial { delivered, failed } => {
            assert_eq!(delivered, vec!["log".to_string()]);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].channel, "slack");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(log.sent().len(), 1);
}

#[test]
fn test_invalid_policy_is_rejected_before_running() {
    let mut policy = PolicyModel::default();
    policy.backup.schedule.hour_of_day = 25;
    assert!(matches!(Orchestrator::new(policy), Err(UpkeepError::Config(_))));
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let project = project();
    let orchestrator = Orchestrator::new(scan_policy())
        .unwrap()
        .with_dependency_engine(dependency_engine(&project));
    let report = orchestrator.run(RunRequest::manual([RunAction::Update])).await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["overall_status"], "partial");
    assert_eq!(json["update"]["status"], "degraded");
    assert_eq!(json["final_state"], "partially_failed");
}
