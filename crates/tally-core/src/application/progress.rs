use crate::domain::events::{
    EngineEvent, EngineEventKind, ExecutionState, ExecutionStatus, Phase, SubmissionId,
};
use crate::domain::report::SkipReason;
use crate::error::ExecutionFailure;
use crate::types::TxHash;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

/// Publishes progress for one submission: typed events on the broadcast
/// stream and a status snapshot on the watch channel.
///
/// Sending never fails the submission; a stream without subscribers simply
/// drops the event.
#[derive(Clone)]
pub struct ProgressReporter {
    submission_id: SubmissionId,
    events: broadcast::Sender<EngineEvent>,
    status: Arc<watch::Sender<ExecutionStatus>>,
}

impl ProgressReporter {
    /// Create a reporter for a submission
    pub fn new(
        submission_id: SubmissionId,
        events: broadcast::Sender<EngineEvent>,
        status: Arc<watch::Sender<ExecutionStatus>>,
    ) -> Self {
        Self {
            submission_id,
            events,
            status,
        }
    }

    /// Submission this reporter belongs to
    pub fn submission_id(&self) -> &SubmissionId {
        &self.submission_id
    }

    fn emit(&self, kind: EngineEventKind) {
        trace!(event_type = kind.event_type(), "Publishing engine event");
        let event = EngineEvent {
            submission_id: self.submission_id.clone(),
            timestamp: chrono::Utc::now(),
            kind,
        };
        if self.events.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    /// Preflight passed; `total_steps` phases will run
    pub fn begin(&self, total_steps: usize) {
        self.status.send_modify(|status| {
            *status = ExecutionStatus {
                state: ExecutionState::Idle,
                current_step: 0,
                total_steps,
                transactions_confirmed: 0,
            };
        });
        self.emit(EngineEventKind::SubmissionStarted { total_steps });
    }

    /// A phase began
    pub fn phase_started(&self, phase: Phase) {
        let mut step = 0;
        let mut total_steps = 0;
        self.status.send_modify(|status| {
            status.state = ExecutionState::from(phase);
            status.current_step += 1;
            // phases discovered mid-flight never push the counter past the total
            status.total_steps = status.total_steps.max(status.current_step);
            step = status.current_step;
            total_steps = status.total_steps;
        });
        debug!(phase = %phase, step, total_steps, "Phase started");
        self.emit(EngineEventKind::PhaseStarted {
            phase,
            step,
            total_steps,
        });
    }

    /// A phase finished
    pub fn phase_completed(&self, phase: Phase) {
        debug!(phase = %phase, "Phase completed");
        self.emit(EngineEventKind::PhaseCompleted { phase });
    }

    /// Add phases that only became necessary while running
    pub fn extend_total(&self, additional: usize) {
        self.status
            .send_modify(|status| status.total_steps += additional);
    }

    /// Remove a planned phase that turned out to have nothing to do
    pub fn drop_planned(&self) {
        self.status
            .send_modify(|status| status.total_steps = status.total_steps.saturating_sub(1));
    }

    /// A transaction was mined successfully
    pub fn transaction_confirmed(&self, phase: Phase, call: &str, hash: &TxHash) {
        self.status
            .send_modify(|status| status.transactions_confirmed += 1);
        self.emit(EngineEventKind::TransactionConfirmed {
            phase,
            call: call.to_string(),
            hash: hash.clone(),
        });
    }

    /// The counter-vault initialisation cascade started
    pub fn recovery_triggered(&self, relationships: usize) {
        self.emit(EngineEventKind::RecoveryTriggered { relationships });
    }

    /// An item was left out of the submission
    pub fn item_skipped(&self, item_id: &str, reason: SkipReason) {
        self.emit(EngineEventKind::ItemSkipped {
            item_id: item_id.to_string(),
            reason,
        });
    }

    /// The submission finished
    pub fn succeed(&self, transactions: usize) {
        self.status
            .send_modify(|status| status.state = ExecutionState::Success);
        self.emit(EngineEventKind::Succeeded { transactions });
    }

    /// The submission failed
    pub fn fail(&self, failure: &ExecutionFailure) {
        self.status
            .send_modify(|status| status.state = ExecutionState::Error);
        self.emit(EngineEventKind::Failed {
            code: failure.code,
            phase: failure.phase,
            message: failure.message.clone(),
        });
    }
}
