//! Policy file loading.
//!
//! The YAML layout mirrors `maintenance_policies.yaml`. Every section and key
//! is optional; omitted values take the defaults below. Conversion into
//! [`PolicyModel`] is where all validation happens, so a bad file never gets
//! as far as an engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{
    BackupPolicy, BackupSchedule, DependencyPolicy, NotificationPolicy, PolicyModel, Result,
    RetentionPolicy, ScanCategory, SecurityPolicy, Severity, Timeouts, UpkeepError,
};

/// Raw policy document as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyFile {
    pub dependency_management: DependencySection,
    pub security_monitoring: SecuritySection,
    pub backup_automation: BackupSection,
    pub notifications: NotificationsSection,
    pub timeouts: TimeoutsSection,
    /// Wiring for concrete collaborators; interpreted by the binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrations: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencySection {
    pub auto_update_patch: bool,
    pub auto_update_minor: bool,
    #[serde(alias = "security_override")]
    pub security_update_override: bool,
    pub test_before_update: bool,
    pub rollback_on_failure: bool,
    pub max_updates_per_run: i64,
    pub critical_packages: Vec<String>,
}

impl Default for DependencySection {
    fn default() -> Self {
        let policy = DependencyPolicy::default();
        Self {
            auto_update_patch: policy.auto_update_patch,
            auto_update_minor: policy.auto_update_minor,
            security_update_override: policy.security_override,
            test_before_update: policy.test_before_update,
            rollback_on_failure: policy.rollback_on_failure,
            max_updates_per_run: policy.max_updates_per_run as i64,
            critical_packages: policy.critical_packages().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// Informational only; cadence is decided by whoever schedules runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_frequency: Option<String>,
    pub auto_fix_enabled: bool,
    pub notification_threshold: String,
    pub scan_types: BTreeMap<String, bool>,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            scan_frequency: Some("daily".to_string()),
            auto_fix_enabled: false,
            notification_threshold: Severity::Medium.to_string(),
            scan_types: ScanCategory::ALL
                .iter()
                .map(|c| (c.as_str().to_string(), true))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    pub enabled: bool,
    pub schedule: ScheduleSection,
    pub retention: RetentionSection,
    pub storage_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_config: Option<LocalStorageSection>,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: ScheduleSection::default(),
            retention: RetentionSection::default(),
            storage_type: "local".to_string(),
            local_config: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    /// `daily`, `weekly`, `monthly` or `<n>d`.
    pub frequency: String,
    /// `HH:MM`, UTC.
    pub time: String,
    /// 0 = Sunday .. 6 = Saturday.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<i64>,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            frequency: "weekly".to_string(),
            time: "02:00".to_string(),
            day: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    pub daily_backups: i64,
    pub weekly_backups: i64,
    pub monthly_backups: i64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        let r = RetentionPolicy::default();
        Self {
            daily_backups: r.daily as i64,
            weekly_backups: r.weekly as i64,
            monthly_backups: r.monthly as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStorageSection {
    pub backup_directory: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsSection {
    pub slack_webhook: Option<String>,
    pub email_recipients: Vec<String>,
}

/// Per-collaborator timeouts in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    pub package_metadata: u64,
    pub install: u64,
    pub test: u64,
    pub scan: u64,
    pub snapshot: u64,
    pub storage: u64,
    pub notify: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        let t = Timeouts::default();
        Self {
            package_metadata: t.package_metadata.as_secs(),
            install: t.install.as_secs(),
            test: t.test.as_secs(),
            scan: t.scan.as_secs(),
            snapshot: t.snapshot.as_secs(),
            storage: t.storage.as_secs(),
            notify: t.notify.as_secs(),
        }
    }
}

fn non_negative(field: &str, value: i64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| UpkeepError::Config(format!("{field} must be non-negative, got {value}")))
}

/// `HH:MM` to the hour. Minutes are validated but schedules fire on the hour.
fn parse_hour(time: &str) -> Result<u32> {
    let bad = || UpkeepError::Config(format!("backup time must be HH:MM, got {time:?}"));
    let (hour, minute) = time.trim().split_once(':').ok_or_else(bad)?;
    let hour: u32 = hour.parse().map_err(|_| bad())?;
    let minute: u32 = minute.parse().map_err(|_| bad())?;
    if hour >= 24 || minute >= 60 {
        return Err(bad());
    }
    if minute != 0 {
        warn!(time = %time, "Backup schedule runs on the hour; minutes are ignored");
    }
    Ok(hour)
}

/// Frequency keyword to (days, default weekday).
fn parse_frequency(frequency: &str) -> Result<(u32, Option<u32>)> {
    let f = frequency.trim().to_ascii_lowercase();
    match f.as_str() {
        "daily" => Ok((1, None)),
        "weekly" => Ok((7, Some(0))),
        "monthly" => Ok((30, None)),
        other => other
            .strip_suffix('d')
            .and_then(|n| n.parse::<u32>().ok())
            .map(|days| (days, None))
            .ok_or_else(|| {
                UpkeepError::Config(format!(
                    "backup frequency must be daily, weekly, monthly or <n>d, got {frequency:?}"
                ))
            }),
    }
}

impl PolicyFile {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| UpkeepError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            UpkeepError::Config(format!("cannot read policy file {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    /// The policy `upkeep init` writes.
    pub fn default_document() -> Result<String> {
        serde_yaml::to_string(&PolicyFile::default())
            .map_err(|e| UpkeepError::Config(e.to_string()))
    }

    /// Convert and validate.
    pub fn to_policy(&self) -> Result<PolicyModel> {
        let deps = &self.dependency_management;
        let dependencies = DependencyPolicy::new(
            deps.auto_update_patch,
            deps.auto_update_minor,
            deps.security_update_override,
            deps.test_before_update,
            deps.rollback_on_failure,
            non_negative("max_updates_per_run", deps.max_updates_per_run)?,
            &deps.critical_packages,
        );

        let sec = &self.security_monitoring;
        let mut scan_categories = std::collections::BTreeSet::new();
        for (name, enabled) in &sec.scan_types {
            let category: ScanCategory = name.parse().map_err(UpkeepError::Config)?;
            if *enabled {
                scan_categories.insert(category);
            }
        }
        let notification_threshold: Severity = sec
            .notification_threshold
            .parse()
            .map_err(UpkeepError::Config)?;
        if sec.auto_fix_enabled {
            warn!("auto_fix_enabled is set but findings are never fixed automatically");
        }

        let backup = &self.backup_automation;
        if !backup.storage_type.eq_ignore_ascii_case("local") {
            return Err(UpkeepError::Config(format!(
                "unsupported backup storage_type {:?}; only local storage is available",
                backup.storage_type
            )));
        }
        let (frequency_days, default_day) = parse_frequency(&backup.schedule.frequency)?;
        let day_of_week = match backup.schedule.day {
            Some(day) => Some(u32::try_from(day).map_err(|_| {
                UpkeepError::Config(format!("backup day must be 0-6 (0 = Sunday), got {day}"))
            })?),
            None => default_day,
        };
        let retention = RetentionPolicy {
            daily: non_negative("daily_backups", backup.retention.daily_backups)?,
            weekly: non_negative("weekly_backups", backup.retention.weekly_backups)?,
            monthly: non_negative("monthly_backups", backup.retention.monthly_backups)?,
        };

        let notes = &self.notifications;
        if !notes.email_recipients.is_empty() {
            warn!(
                recipients = notes.email_recipients.len(),
                "Email notifications are not supported; recipients ignored"
            );
        }

        let t = &self.timeouts;
        let policy = PolicyModel {
            dependencies,
            security: SecurityPolicy {
                scan_categories,
                notification_threshold,
            },
            backup: BackupPolicy {
                enabled: backup.enabled,
                retention,
                schedule: BackupSchedule {
                    frequency_days,
                    hour_of_day: parse_hour(&backup.schedule.time)?,
                    day_of_week,
                },
            },
            notifications: NotificationPolicy {
                slack_webhook: notes
                    .slack_webhook
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                email_recipients: notes.email_recipients.clone(),
            },
            timeouts: Timeouts {
                package_metadata: Duration::from_secs(t.package_metadata),
                install: Duration::from_secs(t.install),
                test: Duration::from_secs(t.test),
                scan: Duration::from_secs(t.scan),
                snapshot: Duration::from_secs(t.snapshot),
                storage: Duration::from_secs(t.storage),
                notify: Duration::from_secs(t.notify),
            },
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Backup directory from `local_config`, if any.
    pub fn backup_directory(&self) -> Option<&Path> {
        self.backup_automation
            .local_config
            .as_ref()
            .map(|c| c.backup_directory.as_path())
    }
}

/// Parse and validate a policy document.
pub fn parse_policy(text: &str) -> Result<PolicyModel> {
    PolicyFile::from_yaml(text)?.to_policy()
}

/// Read, parse and validate a policy file.
pub fn load_policy(path: impl AsRef<Path>) -> Result<PolicyModel> {
    PolicyFile::load(path)?.to_policy()
}
