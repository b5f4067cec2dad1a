//! Seams to the outside world.
//!
//! Engines only talk to package managers, test suites, scan tools, snapshot
//! sources and notification channels through these traits. Production
//! adapters live in the CLI; in-memory fakes live in [`crate::fakes`].

use async_trait::async_trait;

use crate::domain::{Advisory, InstalledPackage, Result, ScanCategory, ScanFinding};
use crate::notifier::FormattedReport;

/// Read-only view of the managed project's dependencies.
#[async_trait]
pub trait PackageMetadataProvider: Send + Sync {
    async fn list_installed(&self) -> Result<Vec<InstalledPackage>>;

    /// Newest published version, or `None` when the registry knows nothing.
    async fn latest_version(&self, package: &str) -> Result<Option<String>>;

    /// Advisories affecting `version` of `package`.
    async fn advisories_for(&self, package: &str, version: &str) -> Result<Vec<Advisory>>;
}

/// Mutates the dependency manifest.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Pin `package` to exactly `version`. Used for both apply and rollback.
    async fn install(&self, package: &str, version: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestVerdict {
    Passed,
    Failed { detail: String },
}

/// Runs the project's gating test suite.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self) -> Result<TestVerdict>;
}

/// One external scan tool, bound to a single category.
#[async_trait]
pub trait ScanToolAdapter: Send + Sync {
    fn category(&self) -> ScanCategory;

    async fn run(&self) -> Result<Vec<ScanFinding>>;
}

/// Produces the bytes that make up one backup.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn describe(&self) -> String;

    async fn capture(&self) -> Result<Vec<u8>>;
}

/// Delivers a formatted run report to one channel.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    fn channel(&self) -> String;

    async fn send(&self, report: &FormattedReport) -> Result<()>;
}
