//! Metrics derived from the engine's event stream.

use anyhow::Context;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram, increment_counter};
use std::collections::HashMap;
use std::time::Duration;
use tally_core::{EngineEvent, EngineEventKind, SubmissionId};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Submissions that passed preflight
pub const SUBMISSIONS_STARTED: &str = "tally_submissions_started_total";
/// Finished submissions, labelled by outcome
pub const SUBMISSIONS_TOTAL: &str = "tally_submissions_total";
/// Phases entered, labelled by phase
pub const PHASES_STARTED: &str = "tally_phase_started_total";
/// Mined transactions, labelled by phase and call
pub const TRANSACTIONS_CONFIRMED: &str = "tally_transactions_confirmed_total";
/// Counter-vault recoveries
pub const RECOVERIES: &str = "tally_recoveries_total";
/// Relationships seeded by recoveries
pub const RECOVERY_RELATIONSHIPS: &str = "tally_recovery_relationships_total";
/// Skipped items, labelled by reason
pub const ITEMS_SKIPPED: &str = "tally_items_skipped_total";
/// Wall time from start to terminal event
pub const SUBMISSION_DURATION: &str = "tally_submission_duration_seconds";
/// Transactions per successful submission
pub const TRANSACTIONS_PER_SUBMISSION: &str = "tally_transactions_per_submission";

/// Totals observed by a recorder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderSummary {
    /// Events seen
    pub events: usize,
    /// Successful submissions
    pub succeeded: usize,
    /// Failed submissions
    pub failed: usize,
    /// Transactions confirmed
    pub transactions: usize,
    /// Items skipped
    pub skipped: usize,
    /// Recoveries triggered
    pub recoveries: usize,
    /// Events lost because the recorder fell behind
    pub lagged: u64,
}

/// Turns [`EngineEvent`]s into counters and histograms
#[derive(Debug)]
pub struct EngineMetrics {
    started: HashMap<SubmissionId, DateTime<Utc>>,
    stale_after: Duration,
    summary: RecorderSummary,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

impl EngineMetrics {
    /// Create a recorder that forgets unfinished submissions after `stale_after`
    pub fn new(stale_after: Duration) -> Self {
        Self {
            started: HashMap::new(),
            stale_after,
            summary: RecorderSummary::default(),
        }
    }

    /// Totals so far
    pub fn summary(&self) -> &RecorderSummary {
        &self.summary
    }

    /// Record one event
    pub fn record(&mut self, event: &EngineEvent) {
        self.summary.events += 1;

        match &event.kind {
            EngineEventKind::SubmissionStarted { .. } => {
                increment_counter!(SUBMISSIONS_STARTED);
                self.prune(event.timestamp);
                self.started
                    .insert(event.submission_id.clone(), event.timestamp);
            }
            EngineEventKind::PhaseStarted { phase, .. } => {
                increment_counter!(PHASES_STARTED, "phase" => phase.as_str());
            }
            EngineEventKind::TransactionConfirmed { phase, call, .. } => {
                self.summary.transactions += 1;
                increment_counter!(
                    TRANSACTIONS_CONFIRMED,
                    "phase" => phase.as_str(),
                    "call" => call.clone()
                );
            }
            EngineEventKind::RecoveryTriggered { relationships } => {
                self.summary.recoveries += 1;
                increment_counter!(RECOVERIES);
                counter!(RECOVERY_RELATIONSHIPS, *relationships as u64);
            }
            EngineEventKind::ItemSkipped { reason, .. } => {
                self.summary.skipped += 1;
                increment_counter!(ITEMS_SKIPPED, "reason" => reason.as_str());
            }
            EngineEventKind::PhaseCompleted { .. } => {}
            EngineEventKind::Succeeded { transactions } => {
                self.summary.succeeded += 1;
                increment_counter!(SUBMISSIONS_TOTAL, "outcome" => "success");
                histogram!(TRANSACTIONS_PER_SUBMISSION, *transactions as f64);
                self.finish(event);
            }
            EngineEventKind::Failed { code, phase, .. } => {
                self.summary.failed += 1;
                increment_counter!(
                    SUBMISSIONS_TOTAL,
                    "outcome" => "failure",
                    "code" => code.as_str(),
                    "phase" => phase.map(|p| p.as_str()).unwrap_or("none")
                );
                self.finish(event);
            }
        }
    }

    fn finish(&mut self, event: &EngineEvent) {
        // preflight failures never emitted a start
        if let Some(started) = self.started.remove(&event.submission_id) {
            let elapsed = (event.timestamp - started).num_milliseconds().max(0) as f64 / 1000.0;
            histogram!(SUBMISSION_DURATION, elapsed);
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let Ok(stale_after) = chrono::Duration::from_std(self.stale_after) else {
            return;
        };
        let before = self.started.len();
        self.started.retain(|_, started| now - *started <= stale_after);
        if self.started.len() < before {
            debug!(dropped = before - self.started.len(), "Forgot unfinished submissions");
        }
    }
}

/// Record every event from `events` until the engine is dropped
pub fn spawn_event_recorder(
    mut events: broadcast::Receiver<EngineEvent>,
    mut metrics: EngineMetrics,
) -> JoinHandle<RecorderSummary> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => metrics.record(&event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Metrics recorder fell behind the event stream");
                    metrics.summary.lagged += missed;
                }
                Err(RecvError::Closed) => break,
            }
        }
        metrics.summary
    })
}

/// Serve metrics for Prometheus on `address`
#[cfg(feature = "prometheus")]
pub fn install_exporter(address: &str) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    let address: SocketAddr = address
        .parse()
        .with_context(|| format!("Invalid metrics address '{}'", address))?;
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("Failed to install Prometheus exporter")?;
    debug!(%address, "Prometheus exporter listening");
    Ok(())
}

/// Serve metrics for Prometheus on `address`
#[cfg(not(feature = "prometheus"))]
pub fn install_exporter(address: &str) -> anyhow::Result<()> {
    Err(anyhow::anyhow!("Metrics address '{}' given but the prometheus feature is disabled", address))
        .context("Failed to install Prometheus exporter")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{FailureCode, Phase, SkipReason, TxHash};

    fn event(submission_id: &SubmissionId, kind: EngineEventKind) -> EngineEvent {
        EngineEvent {
            submission_id: submission_id.clone(),
            timestamp: Utc::now(),
            kind,
        }
    }

    #[test]
    fn test_summary_counts_outcomes() {
        let mut metrics = EngineMetrics::default();
        let id = SubmissionId::new();

        metrics.record(&event(&id, EngineEventKind::SubmissionStarted { total_steps: 1 }));
        metrics.record(&event(
            &id,
            EngineEventKind::TransactionConfirmed {
                phase: Phase::Depositing,
                call: "deposit_batch".to_string(),
                hash: TxHash::new("0x1"),
            },
        ));
        metrics.record(&event(
            &id,
            EngineEventKind::ItemSkipped {
                item_id: "a".to_string(),
                reason: SkipReason::NotIndexed,
            },
        ));
        metrics.record(&event(&id, EngineEventKind::Succeeded { transactions: 1 }));

        let other = SubmissionId::new();
        metrics.record(&event(
            &other,
            EngineEventKind::Failed {
                code: FailureCode::EmptyCart,
                phase: Some(Phase::Preflight),
                message: "Cart is empty".to_string(),
            },
        ));

        let summary = metrics.summary();
        assert_eq!(summary.events, 5);
        assert_eq!(summary.transactions, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(metrics.started.is_empty());
    }

    #[test]
    fn test_unfinished_submissions_are_pruned() {
        let mut metrics = EngineMetrics::new(Duration::from_secs(60));
        let stale = SubmissionId::new();
        metrics.started.insert(stale.clone(), Utc::now() - chrono::Duration::minutes(5));

        metrics.record(&event(
            &SubmissionId::new(),
            EngineEventKind::SubmissionStarted { total_steps: 2 },
        ));

        assert!(!metrics.started.contains_key(&stale));
        assert_eq!(metrics.started.len(), 1);
    }
}
