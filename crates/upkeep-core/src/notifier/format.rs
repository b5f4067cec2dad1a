//! Plain-text rendering of a run report.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::domain::{EngineOutcome, RunReport, Severity, TestResult};

/// A report ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedReport {
    pub title: String,
    pub body: String,
}

impl FormattedReport {
    /// Title and body joined, for single-field transports.
    pub fn to_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.body)
    }
}

/// Render `report`, leaving out update outcomes and findings below `threshold`.
pub fn render(report: &RunReport, threshold: Severity) -> FormattedReport {
    let title = format!(
        "Upkeep run {} finished: {}{}",
        report.run_id,
        report.overall_status,
        if report.cancelled { " (cancelled)" } else { "" }
    );

    let mut body = String::new();
    let _ = writeln!(
        body,
        "Started {} | took {} ms",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.duration_ms()
    );

    if let Some(update) = &report.update {
        let _ = writeln!(body, "\nDependency updates: {}", update.status());
        match update {
            EngineOutcome::Succeeded { result } | EngineOutcome::Degraded { result } => {
                let _ = writeln!(
                    body,
                    "  {} candidates, {} applied, {} failed, {} rolled back",
                    result.analysis.candidates.len(),
                    result.applied_count(),
                    result.failed_count(),
                    result.rolled_back_count()
                );
                for outcome in result.outcomes.iter().filter(|o| o.severity() >= threshold) {
                    let c = &outcome.decision.candidate;
                    let state = if outcome.rolled_back {
                        "rolled back"
                    } else if outcome.is_failure() {
                        "failed"
                    } else if outcome.applied {
                        "applied"
                    } else {
                        "not attempted"
                    };
                    let tests = match outcome.test_result {
                        TestResult::Passed => "tests passed",
                        TestResult::Failed => "tests failed",
                        TestResult::Skipped => "tests skipped",
                    };
                    let _ = write!(
                        body,
                        "  - [{}] {} {} -> {}: {state}, {tests}",
                        outcome.severity(),
                        c.name,
                        c.current_version,
                        c.available_version
                    );
                    if let Some(error) = &outcome.error {
                        let _ = write!(body, " ({error})");
                    }
                    body.push('\n');
                }
                for issue in &result.analysis.issues {
                    let _ = writeln!(body, "  ! {}: {}", issue.package, issue.detail);
                }
            }
            EngineOutcome::Failed { error } => {
                let _ = writeln!(body, "  error: {error}");
            }
            EngineOutcome::Skipped { reason } => {
                let _ = writeln!(body, "  skipped: {reason}");
            }
        }
    }

    if let Some(scan) = &report.scan {
        let _ = writeln!(body, "\nSecurity scan: {}", scan.status());
        match scan {
            EngineOutcome::Succeeded { result } | EngineOutcome::Degraded { result } => {
                let _ = writeln!(
                    body,
                    "  score {}/100, {} findings, {} critical",
                    result.overall_score,
                    result.findings.len(),
                    result.critical_count
                );
                for finding in result.findings_at_or_above(threshold) {
                    let _ = write!(
                        body,
                        "  - [{}] {}: {}",
                        finding.severity, finding.category, finding.description
                    );
                    if let Some(location) = &finding.location {
                        let _ = write!(body, " at {location}");
                    }
                    body.push('\n');
                }
                for category in result.unavailable_categories() {
                    let _ = writeln!(body, "  ! {category} could not run");
                }
            }
            EngineOutcome::Failed { error } => {
                let _ = writeln!(body, "  error: {error}");
            }
            EngineOutcome::Skipped { reason } => {
                let _ = writeln!(body, "  skipped: {reason}");
            }
        }
    }

    if let Some(backup) = &report.backup {
        let _ = writeln!(body, "\nBackup: {}", backup.status());
        match backup {
            EngineOutcome::Succeeded { result } | EngineOutcome::Degraded { result } => {
                let _ = writeln!(
                    body,
                    "  created {} ({} bytes)",
                    result.artifact.id, result.artifact.size_bytes
                );
                if let Some(prune) = &result.prune {
                    let _ = writeln!(
                        body,
                        "  pruned {}, {} failed, {} orphaned payloads",
                        prune.removed.len(),
                        prune.failed.len(),
                        prune.orphans.len()
                    );
                }
                if let Some(error) = &result.prune_error {
                    let _ = writeln!(body, "  prune error: {error}");
                }
            }
            EngineOutcome::Failed { error } => {
                let _ = writeln!(body, "  error: {error}");
            }
            EngineOutcome::Skipped { reason } => {
                let _ = writeln!(body, "  skipped: {reason}");
            }
        }
    }

    FormattedReport { title, body }
}
