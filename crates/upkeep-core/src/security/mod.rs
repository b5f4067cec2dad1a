//! Security monitoring: run scan categories concurrently and merge results.

pub mod score;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::info;

use crate::collaborators::ScanToolAdapter;
use crate::domain::{ScanCategory, ScanFinding, SecurityReport, UpkeepError};
use crate::obs;
use crate::timeout::with_timeout;

/// Runs one adapter per requested category.
pub struct SecurityScanner {
    adapters: BTreeMap<ScanCategory, Arc<dyn ScanToolAdapter>>,
    timeout: Duration,
}

impl SecurityScanner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            adapters: BTreeMap::new(),
            timeout,
        }
    }

    /// Register an adapter under its own category, replacing any previous one.
    pub fn with_adapter(mut self, adapter: Arc<dyn ScanToolAdapter>) -> Self {
        self.adapters.insert(adapter.category(), adapter);
        self
    }

    pub fn registered(&self) -> impl Iterator<Item = ScanCategory> + '_ {
        self.adapters.keys().copied()
    }

    /// Scan every requested category.
    ///
    /// Categories run concurrently; findings are merged in category-declared
    /// order. A category that errors, times out or has no adapter contributes
    /// a single `info` marker and never aborts the others.
    pub async fn scan(&self, categories: &BTreeSet<ScanCategory>) -> SecurityReport {
        let runs = categories.iter().map(|&category| async move {
            let result = match self.adapters.get(&category) {
                Some(adapter) => {
                    with_timeout(&format!("{category} scan"), self.timeout, adapter.run()).await
                }
                None => Err(UpkeepError::unavailable(
                    format!("{category} scanner"),
                    "no adapter configured",
                )),
            };
            if let Err(e) = &result {
                obs::emit_scan_category_failed(category, e);
            }
            (category, result)
        });

        let results: Vec<(ScanCategory, Result<Vec<ScanFinding>, UpkeepError>)> =
            join_all(runs).await;
        let report = SecurityReport::assemble(results);
        info!(
            categories = categories.len(),
            findings = report.findings.len(),
            score = report.overall_score,
            critical = report.critical_count,
            "Security scan complete"
        );
        report
    }
}
