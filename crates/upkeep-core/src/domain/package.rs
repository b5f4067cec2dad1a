//! Dependency update candidates, decisions and outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::severity::Severity;

/// Size of a version change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionDelta {
    Patch,
    Minor,
    Major,
}

impl fmt::Display for VersionDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VersionDelta::Patch => "patch",
            VersionDelta::Minor => "minor",
            VersionDelta::Major => "major",
        })
    }
}

/// A package as reported installed by the metadata provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

impl InstalledPackage {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// A published advisory affecting the installed version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_in: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCandidate {
    pub name: String,
    pub current_version: String,
    pub available_version: String,
    pub version_delta: VersionDelta,
    pub has_security_advisory: bool,
    pub advisory_severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advisory_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approved,
    Deferred,
    ManualRequired,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecisionKind::Approved => "approved",
            DecisionKind::Deferred => "deferred",
            DecisionKind::ManualRequired => "manual-required",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDecision {
    pub candidate: PackageCandidate,
    pub kind: DecisionKind,
    pub reason: String,
}

impl UpdateDecision {
    pub fn is_approved(&self) -> bool {
        self.kind == DecisionKind::Approved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Passed,
    Failed,
    Skipped,
}

/// What happened when an approved decision was executed.
///
/// `rolled_back == true` implies `applied`, `test_result == Failed` and a
/// policy with `rollback_on_failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub decision: UpdateDecision,
    pub applied: bool,
    pub test_result: TestResult,
    pub rolled_back: bool,
    /// Failure detail (apply error, test failure, rollback error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the decision was not attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

impl UpdateOutcome {
    /// Outcome for a decision that was never attempted.
    pub fn not_attempted(decision: UpdateDecision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            applied: false,
            test_result: TestResult::Skipped,
            rolled_back: false,
            error: None,
            skipped_reason: Some(reason.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.test_result == TestResult::Failed
    }

    /// Severity used when relaying the outcome downstream.
    ///
    /// Failed updates rank `High`; others rank by their advisory severity.
    pub fn severity(&self) -> Severity {
        if self.is_failure() {
            return Severity::High;
        }
        self.decision
            .candidate
            .advisory_severity
            .unwrap_or(Severity::Info)
    }
}

/// A per-package problem encountered during analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisIssue {
    pub package: String,
    pub detail: String,
}

/// Result of `DependencyEngine::analyze`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub candidates: Vec<PackageCandidate>,
    pub decisions: Vec<UpdateDecision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<AnalysisIssue>,
}

impl Analysis {
    pub fn count(&self, kind: DecisionKind) -> usize {
        self.decisions.iter().filter(|d| d.kind == kind).count()
    }

    pub fn vulnerable(&self) -> impl Iterator<Item = &PackageCandidate> {
        self.candidates.iter().filter(|c| c.has_security_advisory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(advisory: Option<Severity>) -> UpdateDecision {
        UpdateDecision {
            candidate: PackageCandidate {
                name: "requests".to_string(),
                current_version: "2.31.0".to_string(),
                available_version: "2.31.1".to_string(),
                version_delta: VersionDelta::Patch,
                has_security_advisory: advisory.is_some(),
                advisory_severity: advisory,
                advisory_ids: Vec::new(),
            },
            kind: DecisionKind::Approved,
            reason: "patch update".to_string(),
        }
    }

    #[test]
    fn test_not_attempted_is_not_failure() {
        let outcome = UpdateOutcome::not_attempted(decision(None), "cap reached");
        assert!(!outcome.is_failure());
        assert_eq!(outcome.test_result, TestResult::Skipped);
        assert_eq!(outcome.severity(), Severity::Info);
    }

    #[test]
    fn test_failed_outcome_ranks_high() {
        let mut outcome = UpdateOutcome::not_attempted(decision(Some(Severity::Low)), "x");
        outcome.skipped_reason = None;
        outcome.applied = true;
        outcome.test_result = TestResult::Failed;
        assert!(outcome.is_failure());
        assert_eq!(outcome.severity(), Severity::High);
    }

    #[test]
    fn test_decision_kind_display() {
        assert_eq!(DecisionKind::ManualRequired.to_string(), "manual-required");
    }
}
