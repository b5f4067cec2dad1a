//! Dependency automation: analyze candidates under policy, then apply the
//! approved ones one at a time behind the test gate.

pub mod decision;
pub mod version;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::collaborators::{PackageInstaller, PackageMetadataProvider, TestRunner, TestVerdict};
use crate::domain::{
    Analysis, AnalysisIssue, DependencyPolicy, InstalledPackage, PackageCandidate, Result,
    TestResult, Timeouts, UpdateDecision, UpdateOutcome, UpdateSummary,
};
use crate::obs;
use crate::timeout::with_timeout;

pub use decision::{approval_priority, decide, decide_all, security_driven};
pub use version::{classify_delta, parse_lenient, VersionError};

pub struct DependencyEngine {
    provider: Arc<dyn PackageMetadataProvider>,
    installer: Arc<dyn PackageInstaller>,
    tests: Arc<dyn TestRunner>,
    timeouts: Timeouts,
    /// Held for the duration of one package's apply/test/rollback.
    manifest: Mutex<()>,
}

impl DependencyEngine {
    pub fn new(
        provider: Arc<dyn PackageMetadataProvider>,
        installer: Arc<dyn PackageInstaller>,
        tests: Arc<dyn TestRunner>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            provider,
            installer,
            tests,
            timeouts,
            manifest: Mutex::new(()),
        }
    }

    /// Enumerate installed packages and decide what to do with each update.
    ///
    /// Read-only. Fails only when the installed list itself cannot be read;
    /// per-package lookup problems end up in `Analysis::issues`.
    pub async fn analyze(&self, policy: &DependencyPolicy) -> Result<Analysis> {
        let installed = with_timeout(
            "list installed packages",
            self.timeouts.package_metadata,
            self.provider.list_installed(),
        )
        .await?;

        let mut candidates = Vec::new();
        let mut issues = Vec::new();
        for package in &installed {
            match self.candidate_for(package).await {
                Ok(Some((candidate, advisory_issue))) => {
                    issues.extend(advisory_issue);
                    candidates.push(candidate);
                }
                Ok(None) => {}
                Err(issue) => {
                    warn!(package = %issue.package, detail = %issue.detail, "Skipping package");
                    issues.push(issue);
                }
            }
        }

        let decisions = decide_all(policy, &candidates);
        info!(
            installed = installed.len(),
            candidates = candidates.len(),
            issues = issues.len(),
            "Dependency analysis complete"
        );
        Ok(Analysis {
            candidates,
            decisions,
            issues,
        })
    }

    /// Build a candidate for one package, or `None` when it is up to date.
    ///
    /// An advisory lookup failure keeps the candidate and returns the issue
    /// alongside it.
    async fn candidate_for(
        &self,
        package: &InstalledPackage,
    ) -> std::result::Result<Option<(PackageCandidate, Option<AnalysisIssue>)>, AnalysisIssue> {
        let issue = |detail: String| AnalysisIssue {
            package: package.name.clone(),
            detail,
        };

        let current = parse_lenient(&package.version).map_err(|e| issue(e.to_string()))?;
        let latest = with_timeout(
            "latest version lookup",
            self.timeouts.package_metadata,
            self.provider.latest_version(&package.name),
        )
        .await
        .map_err(|e| issue(format!("latest version lookup failed: {e}")))?;
        let Some(latest) = latest else {
            return Ok(None);
        };
        let available = parse_lenient(&latest).map_err(|e| issue(e.to_string()))?;
        let Some(delta) = classify_delta(&current, &available) else {
            debug!(package = %package.name, version = %package.version, "Up to date");
            return Ok(None);
        };

        let (advisories, advisory_issue) = match with_timeout(
            "advisory lookup",
            self.timeouts.package_metadata,
            self.provider.advisories_for(&package.name, &package.version),
        )
        .await
        {
            Ok(found) => (found, None),
            Err(e) => (Vec::new(), Some(issue(format!("advisory lookup failed: {e}")))),
        };

        let candidate = PackageCandidate {
            name: package.name.clone(),
            current_version: package.version.clone(),
            available_version: latest,
            version_delta: delta,
            has_security_advisory: !advisories.is_empty(),
            advisory_severity: advisories.iter().map(|a| a.severity).max(),
            advisory_ids: advisories.into_iter().map(|a| a.id).collect(),
        };
        Ok(Some((candidate, advisory_issue)))
    }

    /// Apply approved decisions sequentially.
    ///
    /// At most `max_updates_per_run` are attempted, security approvals first.
    /// Every approved decision gets an outcome; ones never started (cap,
    /// cancellation, critical package) are reported as not attempted.
    /// Non-approved decisions are ignored.
    pub async fn execute(
        &self,
        policy: &DependencyPolicy,
        decisions: &[UpdateDecision],
        cancel: &CancelToken,
    ) -> Vec<UpdateOutcome> {
        let mut approved: Vec<&UpdateDecision> =
            decisions.iter().filter(|d| d.is_approved()).collect();
        approved.sort_by(|a, b| approval_priority(policy, a, b));

        let mut outcomes = Vec::with_capacity(approved.len());
        let mut attempted = 0usize;
        for decision in approved {
            if policy.is_critical(&decision.candidate.name) {
                outcomes.push(UpdateOutcome::not_attempted(
                    decision.clone(),
                    "critical package requires manual approval",
                ));
                continue;
            }
            if attempted >= policy.max_updates_per_run {
                outcomes.push(UpdateOutcome::not_attempted(
                    decision.clone(),
                    format!("exceeds max_updates_per_run ({})", policy.max_updates_per_run),
                ));
                continue;
            }
            if cancel.is_cancelled() {
                outcomes.push(UpdateOutcome::not_attempted(decision.clone(), "run cancelled"));
                continue;
            }
            attempted += 1;
            outcomes.push(self.apply_one(policy, decision).await);
        }
        outcomes
    }

    /// Analyze, then execute the resulting decisions.
    pub async fn update(
        &self,
        policy: &DependencyPolicy,
        cancel: &CancelToken,
    ) -> Result<UpdateSummary> {
        let analysis = self.analyze(policy).await?;
        let outcomes = self.execute(policy, &analysis.decisions, cancel).await;
        Ok(UpdateSummary { analysis, outcomes })
    }

    async fn apply_one(
        &self,
        policy: &DependencyPolicy,
        decision: &UpdateDecision,
    ) -> UpdateOutcome {
        let _manifest = self.manifest.lock().await;
        let candidate = &decision.candidate;
        let mut outcome = UpdateOutcome {
            decision: decision.clone(),
            applied: false,
            test_result: TestResult::Skipped,
            rolled_back: false,
            error: None,
            skipped_reason: None,
        };

        if let Err(e) = with_timeout(
            "package install",
            self.timeouts.install,
            self.installer
                .install(&candidate.name, &candidate.available_version),
        )
        .await
        {
            obs::emit_update_failed(&candidate.name, &e);
            outcome.error = Some(format!("apply failed: {e}"));
            return outcome;
        }
        outcome.applied = true;

        if !policy.test_before_update {
            obs::emit_update_applied(
                &candidate.name,
                &candidate.current_version,
                &candidate.available_version,
            );
            return outcome;
        }

        let failure = match with_timeout("test suite", self.timeouts.test, self.tests.run()).await {
            Ok(TestVerdict::Passed) => None,
            Ok(TestVerdict::Failed { detail }) => Some(detail),
            Err(e) => Some(e.to_string()),
        };
        let Some(detail) = failure else {
            outcome.test_result = TestResult::Passed;
            obs::emit_update_applied(
                &candidate.name,
                &candidate.current_version,
                &candidate.available_version,
            );
            return outcome;
        };

        outcome.test_result = TestResult::Failed;
        let test_error = crate::domain::UpkeepError::TestFailure(detail);
        if !policy.rollback_on_failure {
            obs::emit_update_failed(&candidate.name, &test_error);
            outcome.error = Some(format!("{test_error}; left applied"));
            return outcome;
        }

        match with_timeout(
            "package rollback",
            self.timeouts.install,
            self.installer
                .install(&candidate.name, &candidate.current_version),
        )
        .await
        {
            Ok(()) => {
                outcome.rolled_back = true;
                outcome.error = Some(test_error.to_string());
                obs::emit_update_rolled_back(
                    &candidate.name,
                    &candidate.current_version,
                    &test_error.to_string(),
                );
            }
            Err(e) => {
                obs::emit_update_failed(&candidate.name, &e);
                outcome.error = Some(format!("{test_error}; rollback failed: {e}"));
            }
        }
        outcome
    }
}
