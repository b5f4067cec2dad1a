//! Scripted collaborators for tests.
//!
//! `FakeProject` plays package registry, installer and test suite at once so
//! that test outcomes can depend on what was installed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::collaborators::{
    NotificationTransport, PackageInstaller, PackageMetadataProvider, ScanToolAdapter,
    SnapshotSource, TestRunner, TestVerdict,
};
use crate::domain::{Advisory, InstalledPackage, Result, ScanCategory, ScanFinding, UpkeepError};
use crate::notifier::FormattedReport;

#[derive(Debug, Default)]
struct ProjectState {
    installed: BTreeMap<String, String>,
    latest: BTreeMap<String, String>,
    advisories: BTreeMap<String, Vec<Advisory>>,
    /// (name, version) pairs that make the test suite fail while installed.
    broken: BTreeSet<(String, String)>,
    failing_installs: BTreeSet<String>,
    failing_lookups: BTreeSet<String>,
    listing_unavailable: bool,
    test_delay: Option<Duration>,
    install_log: Vec<(String, String)>,
    test_runs: usize,
}

/// In-memory project whose tests fail while a "broken" version is installed.
#[derive(Debug, Default)]
pub struct FakeProject {
    state: Mutex<ProjectState>,
}

impl FakeProject {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&mut self) -> &mut ProjectState {
        self.state.get_mut().unwrap()
    }

    /// Install `name` at `installed`; the registry offers `latest`.
    pub fn with_package(mut self, name: &str, installed: &str, latest: &str) -> Self {
        let state = self.state();
        state.installed.insert(name.to_string(), installed.to_string());
        state.latest.insert(name.to_string(), latest.to_string());
        self
    }

    pub fn with_advisory(mut self, name: &str, advisory: Advisory) -> Self {
        self.state()
            .advisories
            .entry(name.to_string())
            .or_default()
            .push(advisory);
        self
    }

    pub fn breaks_tests_at(mut self, name: &str, version: &str) -> Self {
        self.state()
            .broken
            .insert((name.to_string(), version.to_string()));
        self
    }

    pub fn fail_install_of(mut self, name: &str) -> Self {
        self.state().failing_installs.insert(name.to_string());
        self
    }

    pub fn fail_lookup_of(mut self, name: &str) -> Self {
        self.state().failing_lookups.insert(name.to_string());
        self
    }

    pub fn listing_unavailable(mut self) -> Self {
        self.state().listing_unavailable = true;
        self
    }

    /// Make every test run sleep for `delay` before reporting.
    pub fn slow_tests(mut self, delay: Duration) -> Self {
        self.state().test_delay = Some(delay);
        self
    }

    pub fn installed_version(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().installed.get(name).cloned()
    }

    /// Every `install` call in order, rollbacks included.
    pub fn install_log(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().install_log.clone()
    }

    pub fn test_runs(&self) -> usize {
        self.state.lock().unwrap().test_runs
    }
}

#[async_trait]
impl PackageMetadataProvider for FakeProject {
    async fn list_installed(&self) -> Result<Vec<InstalledPackage>> {
        let state = self.state.lock().unwrap();
        if state.listing_unavailable {
            return Err(UpkeepError::unavailable("package metadata", "registry offline"));
        }
        Ok(state
            .installed
            .iter()
            .map(|(name, version)| InstalledPackage::new(name, version))
            .collect())
    }

    async fn latest_version(&self, package: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        if state.failing_lookups.contains(package) {
            return Err(UpkeepError::unavailable(
                "package metadata",
                format!("no response for {package}"),
            ));
        }
        Ok(state.latest.get(package).cloned())
    }

    async fn advisories_for(&self, package: &str, _version: &str) -> Result<Vec<Advisory>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .advisories
            .get(package)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl PackageInstaller for FakeProject {
    async fn install(&self, package: &str, version: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .install_log
            .push((package.to_string(), version.to_string()));
        if state.failing_installs.contains(package) {
            return Err(UpkeepError::unavailable("installer", format!("cannot install {package}")));
        }
        state
            .installed
            .insert(package.to_string(), version.to_string());
        Ok(())
    }
}

#[async_trait]
impl TestRunner for FakeProject {
    async fn run(&self) -> Result<TestVerdict> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.test_runs += 1;
            state.test_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        let broken: Vec<String> = state
            .installed
            .iter()
            .filter(|(name, version)| state.broken.contains(&((*name).clone(), (*version).clone())))
            .map(|(name, version)| format!("{name}=={version}"))
            .collect();
        if broken.is_empty() {
            Ok(TestVerdict::Passed)
        } else {
            Ok(TestVerdict::Failed {
                detail: format!("suite fails with {}", broken.join(", ")),
            })
        }
    }
}

#[derive(Debug, Clone)]
enum Script {
    Findings(Vec<ScanFinding>),
    Unavailable(String),
    Hang,
}

/// Scan adapter returning a fixed script.
#[derive(Debug)]
pub struct ScriptedScanAdapter {
    category: ScanCategory,
    script: Script,
    delay: Option<Duration>,
}

impl ScriptedScanAdapter {
    pub fn findings(category: ScanCategory, findings: Vec<ScanFinding>) -> Self {
        Self {
            category,
            script: Script::Findings(findings),
            delay: None,
        }
    }

    pub fn unavailable(category: ScanCategory, reason: &str) -> Self {
        Self {
            category,
            script: Script::Unavailable(reason.to_string()),
            delay: None,
        }
    }

    /// Never returns; only a timeout ends the call.
    pub fn hanging(category: ScanCategory) -> Self {
        Self {
            category,
            script: Script::Hang,
            delay: None,
        }
    }

    /// Sleep before answering, to shuffle completion order.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ScanToolAdapter for ScriptedScanAdapter {
    fn category(&self) -> ScanCategory {
        self.category
    }

    async fn run(&self) -> Result<Vec<ScanFinding>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Script::Findings(findings) => Ok(findings.clone()),
            Script::Unavailable(reason) => Err(UpkeepError::unavailable(
                format!("{} tool", self.category),
                reason.clone(),
            )),
            Script::Hang => {
                std::future::pending::<()>().await;
                Ok(Vec::new())
            }
        }
    }
}

/// Snapshot source returning fixed bytes, or failing.
#[derive(Debug)]
pub struct StaticSnapshotSource {
    payload: Option<Vec<u8>>,
    captures: Mutex<usize>,
}

impl StaticSnapshotSource {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(payload.into()),
            captures: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            payload: None,
            captures: Mutex::new(0),
        }
    }

    pub fn captures(&self) -> usize {
        *self.captures.lock().unwrap()
    }
}

#[async_trait]
impl SnapshotSource for StaticSnapshotSource {
    fn describe(&self) -> String {
        "static snapshot".to_string()
    }

    async fn capture(&self) -> Result<Vec<u8>> {
        *self.captures.lock().unwrap() += 1;
        self.payload
            .clone()
            .ok_or_else(|| UpkeepError::unavailable("snapshot source", "source offline"))
    }
}

/// Transport that records what it was asked to send.
#[derive(Debug)]
pub struct RecordingTransport {
    channel: String,
    fail: bool,
    sent: Mutex<Vec<FormattedReport>>,
}

impl RecordingTransport {
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(channel: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(channel)
        }
    }

    pub fn sent(&self) -> Vec<FormattedReport> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    fn channel(&self) -> String {
        self.channel.clone()
    }

    async fn send(&self, report: &FormattedReport) -> Result<()> {
        if self.fail {
            return Err(UpkeepError::unavailable(self.channel.clone(), "connection refused"));
        }
        self.sent.lock().unwrap().push(report.clone());
        Ok(())
    }
}
