use crate::domain::report::SkipReason;
use crate::error::FailureCode;
use crate::types::TxHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Value object: Submission ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

impl SubmissionId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stage of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Validation and configuration load, before any transaction
    Preflight,
    /// Creating missing objects
    CreatingObjects,
    /// Creating missing relationships and their deferred deposits
    CreatingRelationships,
    /// Withdrawing opposing positions
    Redeeming,
    /// Depositing on existing relationships
    Depositing,
}

impl Phase {
    /// Name used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Preflight => "preflight",
            Phase::CreatingObjects => "creating_objects",
            Phase::CreatingRelationships => "creating_relationships",
            Phase::Redeeming => "redeeming",
            Phase::Depositing => "depositing",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine state as observed by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Nothing running
    Idle,
    /// Creating objects
    CreatingObjects,
    /// Creating relationships
    CreatingRelationships,
    /// Redeeming opposing positions
    Redeeming,
    /// Depositing
    Depositing,
    /// Last submission succeeded
    Success,
    /// Last submission failed
    Error,
}

impl From<Phase> for ExecutionState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Preflight => ExecutionState::Idle,
            Phase::CreatingObjects => ExecutionState::CreatingObjects,
            Phase::CreatingRelationships => ExecutionState::CreatingRelationships,
            Phase::Redeeming => ExecutionState::Redeeming,
            Phase::Depositing => ExecutionState::Depositing,
        }
    }
}

/// Snapshot of progress, published on a watch channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    /// Current state
    pub state: ExecutionState,
    /// Phase number currently running, starting at 1
    pub current_step: usize,
    /// Phases planned for this submission
    pub total_steps: usize,
    /// Transactions confirmed so far
    pub transactions_confirmed: usize,
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        Self {
            state: ExecutionState::Idle,
            current_step: 0,
            total_steps: 0,
            transactions_confirmed: 0,
        }
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEventKind {
    /// Preflight passed and the plan is known
    SubmissionStarted {
        /// Planned phases
        total_steps: usize,
    },
    /// A phase began
    PhaseStarted {
        /// Phase
        phase: Phase,
        /// Phase number, starting at 1
        step: usize,
        /// Planned phases
        total_steps: usize,
    },
    /// A transaction was mined successfully
    TransactionConfirmed {
        /// Phase that sent it
        phase: Phase,
        /// Ledger call kind
        call: String,
        /// Transaction hash
        hash: TxHash,
    },
    /// The counter-vault initialisation cascade kicked in
    RecoveryTriggered {
        /// Relationships being seeded
        relationships: usize,
    },
    /// An item was left out of the submission
    ItemSkipped {
        /// Cart item id
        item_id: String,
        /// Why
        reason: SkipReason,
    },
    /// A phase finished
    PhaseCompleted {
        /// Phase
        phase: Phase,
    },
    /// The submission finished
    Succeeded {
        /// Transactions sent
        transactions: usize,
    },
    /// The submission failed
    Failed {
        /// Failure code
        code: FailureCode,
        /// Phase that failed
        phase: Option<Phase>,
        /// Message
        message: String,
    },
}

impl EngineEventKind {
    /// Returns the type of the event as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEventKind::SubmissionStarted { .. } => "submission.started",
            EngineEventKind::PhaseStarted { .. } => "phase.started",
            EngineEventKind::TransactionConfirmed { .. } => "transaction.confirmed",
            EngineEventKind::RecoveryTriggered { .. } => "recovery.triggered",
            EngineEventKind::ItemSkipped { .. } => "item.skipped",
            EngineEventKind::PhaseCompleted { .. } => "phase.completed",
            EngineEventKind::Succeeded { .. } => "submission.succeeded",
            EngineEventKind::Failed { .. } => "submission.failed",
        }
    }
}

/// Event published on the engine's broadcast stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Submission the event belongs to
    pub submission_id: SubmissionId,
    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
    /// Event payload
    pub kind: EngineEventKind,
}
