//! Concrete collaborators: processes, files and webhooks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use upkeep_core::{
    Advisory, FormattedReport, InstalledPackage, NotificationTransport, PackageInstaller,
    PackageMetadataProvider, Result, ScanCategory, ScanFinding, ScanToolAdapter, Severity,
    SnapshotSource, TestRunner, TestVerdict, UpkeepError,
};

/// `integrations` section of the policy file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    /// JSON inventory of installed packages, latest versions and advisories.
    pub inventory_file: Option<PathBuf>,
    /// Install command; `{package}` and `{version}` are substituted.
    pub install_command: Option<Vec<String>>,
    pub test_command: Option<Vec<String>>,
    /// Scan command per category name; stdout is a JSON array of findings.
    pub scan_commands: BTreeMap<String, Vec<String>>,
    pub backup_source: Option<PathBuf>,
    pub backup_destination: Option<PathBuf>,
    pub catalog_file: Option<PathBuf>,
}

impl IntegrationConfig {
    pub fn from_value(value: Option<&serde_yaml::Value>) -> Result<Self> {
        match value {
            Some(v) => serde_yaml::from_value(v.clone())
                .map_err(|e| UpkeepError::Config(format!("integrations: {e}"))),
            None => Ok(Self::default()),
        }
    }

    /// Scan adapters for every configured category.
    pub fn scan_adapters(&self) -> Result<Vec<CommandScanAdapter>> {
        self.scan_commands
            .iter()
            .map(|(name, command)| {
                let category: ScanCategory = name.parse().map_err(UpkeepError::Config)?;
                Ok(CommandScanAdapter::new(category, command.clone()))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Process execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CommandOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
    success: bool,
}

impl CommandOutput {
    /// Last few lines of stderr (or stdout when stderr is empty).
    fn tail(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(5);
        lines[start..].join("\n")
    }
}

/// Run a command to completion. The child is killed if the future is dropped,
/// so an outer timeout never leaks a process.
async fn run_command(collaborator: &str, command: &[String]) -> Result<CommandOutput> {
    let Some((exe, args)) = command.split_first() else {
        return Err(UpkeepError::unavailable(collaborator, "empty command"));
    };

    let output = Command::new(exe)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| UpkeepError::unavailable(collaborator, format!("cannot run {exe}: {e}")))?;

    let exit_code = output.status.code().unwrap_or(-1);
    debug!(collaborator = %collaborator, exit_code, "Command finished");
    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        success: output.status.success(),
    })
}

fn substitute(template: &[String], package: &str, version: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace("{package}", package).replace("{version}", version))
        .collect()
}

// ---------------------------------------------------------------------------
// Dependency collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct Inventory {
    packages: Vec<InventoryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct InventoryEntry {
    name: String,
    version: String,
    #[serde(default)]
    latest: Option<String>,
    #[serde(default)]
    advisories: Vec<Advisory>,
}

/// Package metadata read from a JSON inventory, refreshed on every call.
pub struct InventoryFileProvider {
    path: PathBuf,
}

impl InventoryFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<Inventory> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            UpkeepError::unavailable("package inventory", format!("{}: {e}", self.path.display()))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn entry(&self, package: &str) -> Result<Option<InventoryEntry>> {
        Ok(self
            .read()
            .await?
            .packages
            .into_iter()
            .find(|p| p.name == package))
    }
}

#[async_trait]
impl PackageMetadataProvider for InventoryFileProvider {
    async fn list_installed(&self) -> Result<Vec<InstalledPackage>> {
        Ok(self
            .read()
            .await?
            .packages
            .into_iter()
            .map(|p| InstalledPackage::new(p.name, p.version))
            .collect())
    }

    async fn latest_version(&self, package: &str) -> Result<Option<String>> {
        Ok(self.entry(package).await?.and_then(|p| p.latest))
    }

    async fn advisories_for(&self, package: &str, version: &str) -> Result<Vec<Advisory>> {
        Ok(self
            .entry(package)
            .await?
            .filter(|p| p.version == version)
            .map(|p| p.advisories)
            .unwrap_or_default())
    }
}

/// Installs by running a templated command.
pub struct CommandInstaller {
    template: Vec<String>,
}

impl CommandInstaller {
    pub fn new(template: Vec<String>) -> Self {
        Self { template }
    }
}

#[async_trait]
impl PackageInstaller for CommandInstaller {
    async fn install(&self, package: &str, version: &str) -> Result<()> {
        let command = substitute(&self.template, package, version);
        let output = run_command("installer", &command).await?;
        if !output.success {
            return Err(UpkeepError::unavailable(
                "installer",
                format!("exit code {}: {}", output.exit_code, output.tail()),
            ));
        }
        Ok(())
    }
}

/// Runs the gating suite; any non-zero exit fails the gate.
pub struct CommandTestRunner {
    command: Option<Vec<String>>,
}

impl CommandTestRunner {
    pub fn new(command: Option<Vec<String>>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self) -> Result<TestVerdict> {
        let Some(command) = &self.command else {
            return Err(UpkeepError::unavailable("test runner", "no test_command configured"));
        };
        let output = run_command("test runner", command).await?;
        if output.success {
            Ok(TestVerdict::Passed)
        } else {
            Ok(TestVerdict::Failed {
                detail: format!("exit code {}: {}", output.exit_code, output.tail()),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Security scanning
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ReportedFinding {
    severity: Severity,
    description: String,
    #[serde(default)]
    location: Option<String>,
}

/// Scan tool printing a JSON array of `{severity, description, location?}`.
///
/// Many tools exit non-zero when they find something, so the exit code is
/// ignored whenever stdout parses.
pub struct CommandScanAdapter {
    category: ScanCategory,
    command: Vec<String>,
}

impl CommandScanAdapter {
    pub fn new(category: ScanCategory, command: Vec<String>) -> Self {
        Self { category, command }
    }
}

#[async_trait]
impl ScanToolAdapter for CommandScanAdapter {
    fn category(&self) -> ScanCategory {
        self.category
    }

    async fn run(&self) -> Result<Vec<ScanFinding>> {
        let tool = format!("{} tool", self.category);
        let output = run_command(&tool, &self.command).await?;
        let reported: Vec<ReportedFinding> =
            serde_json::from_str(output.stdout.trim()).map_err(|e| {
                UpkeepError::unavailable(
                    tool.clone(),
                    format!("unreadable output (exit code {}): {e}", output.exit_code),
                )
            })?;
        Ok(reported
            .into_iter()
            .map(|r| ScanFinding {
                category: self.category,
                severity: r.severity,
                description: r.description,
                location: r.location,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotArchive {
    pub source: String,
    pub captured_at: DateTime<Utc>,
    pub files: Vec<ArchivedFile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArchivedFile {
    /// Relative to the snapshot root, `/`-separated.
    pub path: String,
    pub size: u64,
    pub content_hex: String,
}

/// Captures a directory tree as a JSON archive.
pub struct DirectorySnapshotSource {
    root: PathBuf,
    exclude: Vec<PathBuf>,
}

impl DirectorySnapshotSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: Vec::new(),
        }
    }

    /// Skip `path` (and everything below it), e.g. the backup destination.
    pub fn excluding(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude.push(path.into());
        self
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    exclude: &[PathBuf],
    out: &mut Vec<ArchivedFile>,
) -> std::io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.path());
    for entry in entries {
        let path = entry.path();
        if exclude.iter().any(|x| path.starts_with(x)) {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, exclude, out)?;
        } else if file_type.is_file() {
            let data = std::fs::read(&path)?;
            let relative = path.strip_prefix(root).unwrap_or(&path);
            out.push(ArchivedFile {
                path: relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
                size: data.len() as u64,
                content_hex: hex::encode(&data),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl SnapshotSource for DirectorySnapshotSource {
    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }

    async fn capture(&self) -> Result<Vec<u8>> {
        let root = self.root.clone();
        let exclude = self.exclude.clone();
        let files = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            collect_files(&root, &root, &exclude, &mut files).map(|_| files)
        })
        .await
        .map_err(|e| UpkeepError::unavailable("snapshot source", e.to_string()))?
        .map_err(|e| {
            UpkeepError::unavailable("snapshot source", format!("{}: {e}", self.root.display()))
        })?;

        let archive = SnapshotArchive {
            source: self.root.display().to_string(),
            captured_at: Utc::now(),
            files,
        };
        Ok(serde_json::to_vec(&archive)?)
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Slack-compatible incoming webhook.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    fn channel(&self) -> String {
        "slack".to_string()
    }

    async fn send(&self, report: &FormattedReport) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "text": report.to_text() }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| UpkeepError::unavailable("slack webhook", e.to_string()))?;
        Ok(())
    }
}

/// Writes the report to the log.
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    fn channel(&self) -> String {
        "log".to_string()
    }

    async fn send(&self, report: &FormattedReport) -> Result<()> {
        info!(title = %report.title, "{}", report.body);
        Ok(())
    }
}
