//! Upkeep Core Library
//!
//! Policy-driven maintenance automation: dependency updates behind a test
//! gate, security scanning and backup lifecycle management, sequenced by a
//! single orchestrator that isolates failures per engine and per item.

pub mod backup;
pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod dependency;
pub mod domain;
pub mod fakes;
pub mod notifier;
pub mod obs;
pub mod orchestrator;
pub mod schedule;
pub mod security;
pub mod telemetry;
pub mod timeout;

pub use domain::{
    Advisory, Analysis, AnalysisIssue, BackupPolicy, BackupSchedule, BackupSummary,
    ChannelFailure, DecisionKind, DependencyPolicy, EngineOutcome, EngineStatus,
    InstalledPackage, NotificationPolicy, NotifyOutcome, OverallStatus, PackageCandidate,
    PolicyModel, PruneFailure, PruneReport, Result, RetentionPolicy, RunAction, RunReport,
    RunRequest, RunTrigger, ScanCategory, ScanFinding, SecurityPolicy, SecurityReport, Severity,
    TestResult, Timeouts, UpdateDecision, UpdateOutcome, UpdateSummary, UpkeepError,
    VersionDelta,
};

pub use backup::BackupEngine;
pub use cancel::CancelToken;
pub use collaborators::{
    NotificationTransport, PackageInstaller, PackageMetadataProvider, ScanToolAdapter,
    SnapshotSource, TestRunner, TestVerdict,
};
pub use config::{load_policy, parse_policy, PolicyFile};
pub use dependency::DependencyEngine;
pub use notifier::{FormattedReport, Notifier};
pub use orchestrator::{Orchestrator, RunState};
pub use security::SecurityScanner;

pub use upkeep_state::{
    ArtifactId, BackupArtifact, BackupCatalog, ContentDigest, Granularity, StorageBackend,
    StorageError, StorageLocation,
};
