//! Policy model and result types shared by every engine.

pub mod error;
pub mod package;
pub mod policy;
pub mod report;
pub mod scan;
pub mod severity;

pub use error::{Result, UpkeepError};
pub use package::{
    Advisory, Analysis, AnalysisIssue, DecisionKind, InstalledPackage, PackageCandidate,
    TestResult, UpdateDecision, UpdateOutcome, VersionDelta,
};
pub use policy::{
    BackupPolicy, BackupSchedule, DependencyPolicy, NotificationPolicy, PolicyModel,
    RetentionPolicy, SecurityPolicy, Timeouts,
};
pub use report::{
    BackupSummary, ChannelFailure, EngineOutcome, EngineStatus, NotifyOutcome, OverallStatus,
    PruneFailure, PruneReport, RunAction, RunReport, RunRequest, RunTrigger, UpdateSummary,
};
pub use scan::{CategoryStatus, ScanCategory, ScanFinding, SecurityReport};
pub use severity::Severity;
