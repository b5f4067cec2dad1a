//! Immutable automation policy, loaded once per run.

use std::collections::BTreeSet;
use std::time::Duration;

use upkeep_state::Granularity;

use super::error::{Result, UpkeepError};
use super::scan::ScanCategory;
use super::severity::Severity;

/// Everything the engines need to know about how to behave.
///
/// Built by `config::parse_policy` (or `Default`) and validated before use;
/// engines only ever see it by shared reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyModel {
    pub dependencies: DependencyPolicy,
    pub security: SecurityPolicy,
    pub backup: BackupPolicy,
    pub notifications: NotificationPolicy,
    pub timeouts: Timeouts,
}

impl PolicyModel {
    /// Check the invariants types alone cannot express.
    pub fn validate(&self) -> Result<()> {
        self.backup.schedule.validate()?;
        self.timeouts.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyPolicy {
    pub auto_update_patch: bool,
    pub auto_update_minor: bool,
    /// A security-fixing update bypasses the patch/minor gate.
    pub security_override: bool,
    pub test_before_update: bool,
    pub rollback_on_failure: bool,
    /// Zero means no updates are applied.
    pub max_updates_per_run: usize,
    /// Lowercased names that always require manual approval.
    critical_packages: BTreeSet<String>,
}

impl DependencyPolicy {
    pub fn new(
        auto_update_patch: bool,
        auto_update_minor: bool,
        security_override: bool,
        test_before_update: bool,
        rollback_on_failure: bool,
        max_updates_per_run: usize,
        critical_packages: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        Self {
            auto_update_patch,
            auto_update_minor,
            security_override,
            test_before_update,
            rollback_on_failure,
            max_updates_per_run,
            critical_packages: critical_packages
                .into_iter()
                .map(|p| normalize_package_name(p.as_ref()))
                .collect(),
        }
    }

    pub fn is_critical(&self, package: &str) -> bool {
        self.critical_packages
            .contains(&normalize_package_name(package))
    }

    pub fn critical_packages(&self) -> impl Iterator<Item = &str> {
        self.critical_packages.iter().map(String::as_str)
    }
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        Self::new(
            true,
            false,
            true,
            true,
            true,
            10,
            ["django", "fastapi", "requests", "sqlalchemy"],
        )
    }
}

/// Package names compare case-insensitively with `_`/`.` treated as `-`.
fn normalize_package_name(name: &str) -> String {
    name.trim()
        .to_ascii_lowercase()
        .replace(['_', '.'], "-")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub scan_categories: BTreeSet<ScanCategory>,
    /// Only governs what the notifier relays, never what a scan returns.
    pub notification_threshold: Severity,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            scan_categories: ScanCategory::ALL.into_iter().collect(),
            notification_threshold: Severity::Medium,
        }
    }
}

/// Number of verified artifacts to keep per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub daily: usize,
    pub weekly: usize,
    pub monthly: usize,
}

impl RetentionPolicy {
    pub fn keep(&self, granularity: Granularity) -> usize {
        match granularity {
            Granularity::Daily => self.daily,
            Granularity::Weekly => self.weekly,
            Granularity::Monthly => self.monthly,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily: 7,
            weekly: 4,
            monthly: 12,
        }
    }
}

/// When scheduled backups should happen. Advisory data for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupSchedule {
    pub frequency_days: u32,
    pub hour_of_day: u32,
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: Option<u32>,
}

impl BackupSchedule {
    fn validate(&self) -> Result<()> {
        if self.frequency_days == 0 {
            return Err(UpkeepError::Config(
                "backup frequency must be at least one day".to_string(),
            ));
        }
        if self.hour_of_day >= 24 {
            return Err(UpkeepError::Config(format!(
                "backup hour_of_day must be < 24, got {}",
                self.hour_of_day
            )));
        }
        if let Some(day) = self.day_of_week {
            if day >= 7 {
                return Err(UpkeepError::Config(format!(
                    "backup day_of_week must be 0-6 (0 = Sunday), got {day}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for BackupSchedule {
    fn default() -> Self {
        Self {
            frequency_days: 7,
            hour_of_day: 2,
            day_of_week: Some(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPolicy {
    pub enabled: bool,
    pub retention: RetentionPolicy,
    pub schedule: BackupSchedule,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            retention: RetentionPolicy::default(),
            schedule: BackupSchedule::default(),
        }
    }
}

/// Where run reports are delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationPolicy {
    pub slack_webhook: Option<String>,
    pub email_recipients: Vec<String>,
}

/// Upper bound for each kind of collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub package_metadata: Duration,
    pub install: Duration,
    pub test: Duration,
    pub scan: Duration,
    pub snapshot: Duration,
    pub storage: Duration,
    pub notify: Duration,
}

impl Timeouts {
    /// The same bound for every call; handy in tests.
    pub fn uniform(limit: Duration) -> Self {
        Self {
            package_metadata: limit,
            install: limit,
            test: limit,
            scan: limit,
            snapshot: limit,
            storage: limit,
            notify: limit,
        }
    }

    fn validate(&self) -> Result<()> {
        let all = [
            ("package_metadata", self.package_metadata),
            ("install", self.install),
            ("test", self.test),
            ("scan", self.scan),
            ("snapshot", self.snapshot),
            ("storage", self.storage),
            ("notify", self.notify),
        ];
        for (name, limit) in all {
            if limit.is_zero() {
                return Err(UpkeepError::Config(format!(
                    "timeout for {name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            package_metadata: Duration::from_secs(60),
            install: Duration::from_secs(600),
            test: Duration::from_secs(1800),
            scan: Duration::from_secs(900),
            snapshot: Duration::from_secs(1800),
            storage: Duration::from_secs(600),
            notify: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        PolicyModel::default().validate().unwrap();
    }

    #[test]
    fn test_critical_names_are_normalized() {
        let policy =
            DependencyPolicy::new(true, true, true, true, true, 5, ["Django", "zope.interface"]);
        assert!(policy.is_critical("django"));
        assert!(policy.is_critical("DJANGO"));
        assert!(policy.is_critical("zope_interface"));
        assert!(!policy.is_critical("flask"));
    }

    #[test]
    fn test_schedule_validation() {
        let mut policy = PolicyModel::default();
        policy.backup.schedule.hour_of_day = 24;
        assert!(matches!(policy.validate(), Err(UpkeepError::Config(_))));

        let mut policy = PolicyModel::default();
        policy.backup.schedule.day_of_week = Some(7);
        assert!(policy.validate().is_err());

        let mut policy = PolicyModel::default();
        policy.backup.schedule.frequency_days = 0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut policy = PolicyModel::default();
        policy.timeouts.test = Duration::ZERO;
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("test"));
    }

    #[test]
    fn test_retention_keep() {
        let r = RetentionPolicy::default();
        assert_eq!(r.keep(Granularity::Daily), 7);
        assert_eq!(r.keep(Granularity::Weekly), 4);
        assert_eq!(r.keep(Granularity::Monthly), 12);
    }
}
