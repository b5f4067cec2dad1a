//! Report delivery. Never affects the status of the run it reports on.

pub mod format;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::collaborators::NotificationTransport;
use crate::domain::{ChannelFailure, NotifyOutcome, RunReport, Severity};
use crate::obs;
use crate::timeout::with_timeout;

pub use format::{render, FormattedReport};

pub struct Notifier {
    transports: Vec<Arc<dyn NotificationTransport>>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(transports: Vec<Arc<dyn NotificationTransport>>, timeout: Duration) -> Self {
        Self {
            transports,
            timeout,
        }
    }

    pub fn channels(&self) -> Vec<String> {
        self.transports.iter().map(|t| t.channel()).collect()
    }

    /// Format `report` once and hand it to every transport.
    pub async fn notify(&self, report: &RunReport, threshold: Severity) -> NotifyOutcome {
        if self.transports.is_empty() {
            return NotifyOutcome::Skipped {
                reason: "no notification channels configured".to_string(),
            };
        }

        let formatted = render(report, threshold);
        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for transport in &self.transports {
            let channel = transport.channel();
            match with_timeout(
                &format!("notify {channel}"),
                self.timeout,
                transport.send(&formatted),
            )
            .await
            {
                Ok(()) => delivered.push(channel),
                Err(e) => {
                    obs::emit_notify_failed(&channel, &e);
                    failed.push(ChannelFailure {
                        channel,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(delivered = delivered.len(), failed = failed.len(), "Notification dispatched");
        if failed.is_empty() {
            NotifyOutcome::Delivered {
                channels: delivered,
            }
        } else {
            NotifyOutcome::Partial { delivered, failed }
        }
    }
}
