//! Score properties and per-category isolation of the security scanner.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use upkeep_core::domain::CategoryStatus;
use upkeep_core::fakes::ScriptedScanAdapter;
use upkeep_core::security::score::overall_score;
use upkeep_core::{ScanCategory, ScanFinding, SecurityScanner, Severity};

fn finding(category: ScanCategory, severity: Severity, text: &str) -> ScanFinding {
    ScanFinding::new(category, severity, text)
}

fn sample_findings() -> Vec<ScanFinding> {
    vec![
        finding(ScanCategory::SecretScanning, Severity::Critical, "aws key in .env"),
        finding(ScanCategory::CodeSecurityIssues, Severity::Medium, "eval() call"),
        finding(ScanCategory::CodeSecurityIssues, Severity::Low, "assert used"),
        finding(ScanCategory::ConfigurationIssues, Severity::High, "DEBUG=True"),
        finding(ScanCategory::ContainerSecurity, Severity::Info, "no healthcheck"),
        finding(ScanCategory::DependencyVulnerabilities, Severity::High, "jinja2 CVE"),
    ]
}

#[test]
fn test_score_is_monotonic_under_additions() {
    let all = sample_findings();
    let mut so_far = Vec::new();
    let mut previous = overall_score(&so_far);
    for f in all {
        so_far.push(f);
        let score = overall_score(&so_far);
        assert!(score <= previous, "score rose from {previous} to {score}");
        previous = score;
    }
}

#[test]
fn test_score_ignores_order() {
    let forward = sample_findings();
    let mut reversed = forward.clone();
    reversed.reverse();
    let mut rotated = forward.clone();
    rotated.rotate_left(2);

    let expected = overall_score(&forward);
    assert_eq!(overall_score(&reversed), expected);
    assert_eq!(overall_score(&rotated), expected);
    assert_eq!(expected, 100 - 25 - 4 - 1 - 10 - 10);
}

#[test]
fn test_adding_higher_severity_never_raises_score() {
    let base = sample_findings();
    for severity in Severity::DESCENDING {
        let mut more = base.clone();
        more.push(finding(ScanCategory::SecretScanning, severity, "extra"));
        assert!(overall_score(&more) <= overall_score(&base));
    }
}

#[tokio::test]
async fn test_findings_follow_category_order_not_completion_order() {
    let scanner = SecurityScanner::new(Duration::from_secs(5))
        .with_adapter(Arc::new(
            ScriptedScanAdapter::findings(
                ScanCategory::DependencyVulnerabilities,
                vec![
                    finding(ScanCategory::DependencyVulnerabilities, Severity::High, "first"),
                    finding(ScanCategory::DependencyVulnerabilities, Severity::Low, "second"),
                ],
            )
            .after(Duration::from_millis(40)),
        ))
        .with_adapter(Arc::new(ScriptedScanAdapter::findings(
            ScanCategory::ConfigurationIssues,
            vec![finding(ScanCategory::ConfigurationIssues, Severity::Medium, "third")],
        )));

    let requested: BTreeSet<_> = [
        ScanCategory::ConfigurationIssues,
        ScanCategory::DependencyVulnerabilities,
    ]
    .into_iter()
    .collect();
    let report = scanner.scan(&requested).await;
    let texts: Vec<_> = report.findings.iter().map(|f| f.description.as_str()).collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_unavailable_and_missing_categories_become_markers() {
    let scanner = SecurityScanner::new(Duration::from_secs(5))
        .with_adapter(Arc::new(ScriptedScanAdapter::findings(
            ScanCategory::CodeSecurityIssues,
            vec![finding(ScanCategory::CodeSecurityIssues, Severity::High, "sql injection")],
        )))
        .with_adapter(Arc::new(ScriptedScanAdapter::unavailable(
            ScanCategory::SecretScanning,
            "gitleaks not installed",
        )));

    let report = scanner.scan(&ScanCategory::ALL.into_iter().collect()).await;

    assert_eq!(report.findings.len(), 5);
    assert_eq!(report.count_at(Severity::Info), 4);
    assert_eq!(report.overall_score, 90);
    assert_eq!(report.unavailable_categories().len(), 4);
    assert!(matches!(
        report.categories[1],
        CategoryStatus::Ran { category: ScanCategory::CodeSecurityIssues, findings: 1 }
    ));
    let secret = report
        .findings
        .iter()
        .find(|f| f.category == ScanCategory::SecretScanning)
        .unwrap();
    assert!(secret.description.contains("gitleaks not installed"));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_tool_times_out_without_blocking_others() {
    let scanner = SecurityScanner::new(Duration::from_secs(2))
        .with_adapter(Arc::new(ScriptedScanAdapter::hanging(ScanCategory::ContainerSecurity)))
        .with_adapter(Arc::new(ScriptedScanAdapter::findings(
            ScanCategory::SecretScanning,
            vec![finding(ScanCategory::SecretScanning, Severity::Critical, "private key")],
        )));

    let requested: BTreeSet<_> = [ScanCategory::ContainerSecurity, ScanCategory::SecretScanning]
        .into_iter()
        .collect();
    let report = scanner.scan(&requested).await;

    assert_eq!(report.critical_count, 1);
    assert_eq!(report.unavailable_categories(), vec![ScanCategory::ContainerSecurity]);
    assert!(report.findings[1].description.contains("timed out"));
}
