//! Security scan categories, findings and the aggregated report.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::UpkeepError;
use super::severity::Severity;
use crate::security::score::overall_score;

/// Independent scan categories, in the order their findings are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanCategory {
    DependencyVulnerabilities,
    CodeSecurityIssues,
    SecretScanning,
    ContainerSecurity,
    ConfigurationIssues,
}

impl ScanCategory {
    pub const ALL: [ScanCategory; 5] = [
        ScanCategory::DependencyVulnerabilities,
        ScanCategory::CodeSecurityIssues,
        ScanCategory::SecretScanning,
        ScanCategory::ContainerSecurity,
        ScanCategory::ConfigurationIssues,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanCategory::DependencyVulnerabilities => "dependency_vulnerabilities",
            ScanCategory::CodeSecurityIssues => "code_security_issues",
            ScanCategory::SecretScanning => "secret_scanning",
            ScanCategory::ContainerSecurity => "container_security",
            ScanCategory::ConfigurationIssues => "configuration_issues",
        }
    }
}

impl fmt::Display for ScanCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| format!("unknown scan type: {s}"))
    }
}

/// A single issue reported by one scan category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFinding {
    pub category: ScanCategory,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ScanFinding {
    pub fn new(category: ScanCategory, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            description: description.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Marker recorded in place of findings when a category could not run.
    pub fn unavailable_marker(category: ScanCategory, reason: &str) -> Self {
        ScanFinding::new(
            category,
            Severity::Info,
            format!("{category} scan could not run: {reason}"),
        )
    }
}

/// What happened to one requested category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CategoryStatus {
    Ran { category: ScanCategory, findings: usize },
    Unavailable { category: ScanCategory, reason: String },
}

impl CategoryStatus {
    pub fn category(&self) -> ScanCategory {
        match self {
            CategoryStatus::Ran { category, .. } | CategoryStatus::Unavailable { category, .. } => {
                *category
            }
        }
    }
}

/// Aggregated result of one scan pass.
///
/// `overall_score` and `critical_count` are derived from `findings` at
/// construction and never set independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub findings: Vec<ScanFinding>,
    pub overall_score: u8,
    pub critical_count: usize,
    pub categories: Vec<CategoryStatus>,
    pub scanned_at: DateTime<Utc>,
}

impl SecurityReport {
    /// Merge per-category results, given in category-declared order.
    pub fn assemble(
        results: Vec<(ScanCategory, std::result::Result<Vec<ScanFinding>, UpkeepError>)>,
    ) -> Self {
        let mut findings = Vec::new();
        let mut categories = Vec::with_capacity(results.len());

        for (category, result) in results {
            match result {
                Ok(found) => {
                    categories.push(CategoryStatus::Ran {
                        category,
                        findings: found.len(),
                    });
                    findings.extend(found.into_iter().map(|mut f| {
                        f.category = category;
                        f
                    }));
                }
                Err(e) => {
                    let reason = e.to_string();
                    findings.push(ScanFinding::unavailable_marker(category, &reason));
                    categories.push(CategoryStatus::Unavailable { category, reason });
                }
            }
        }

        Self::from_findings(findings, categories)
    }

    pub fn from_findings(findings: Vec<ScanFinding>, categories: Vec<CategoryStatus>) -> Self {
        let overall_score = overall_score(&findings);
        let critical_count = findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .count();
        Self {
            findings,
            overall_score,
            critical_count,
            categories,
            scanned_at: Utc::now(),
        }
    }

    /// Categories that could not run.
    pub fn unavailable_categories(&self) -> Vec<ScanCategory> {
        self.categories
            .iter()
            .filter(|c| matches!(c, CategoryStatus::Unavailable { .. }))
            .map(CategoryStatus::category)
            .collect()
    }

    pub fn count_at(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Findings at or above `threshold`, in report order.
    pub fn findings_at_or_above(&self, threshold: Severity) -> impl Iterator<Item = &ScanFinding> {
        self.findings.iter().filter(move |f| f.severity >= threshold)
    }
}
