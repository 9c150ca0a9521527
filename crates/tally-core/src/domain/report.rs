use crate::domain::events::SubmissionId;
use crate::types::{amount_string, TxHash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an item was left out of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Against vote on a relationship that does not exist yet
    AgainstOnNewRelationship,
    /// The created relationship never showed up in the indexer
    NotIndexed,
    /// The counter id of the relationship could not be resolved
    CounterIdUnavailable,
}

impl SkipReason {
    /// Snake-case name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AgainstOnNewRelationship => "against_on_new_relationship",
            SkipReason::NotIndexed => "not_indexed",
            SkipReason::CounterIdUnavailable => "counter_id_unavailable",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::AgainstOnNewRelationship => {
                "against votes are not possible on relationships that do not exist yet"
            }
            SkipReason::NotIndexed => "relationship was not indexed in time",
            SkipReason::CounterIdUnavailable => "counter relationship id unavailable",
        };
        f.write_str(text)
    }
}

/// An item that was not executed, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedItem {
    /// Cart item id
    pub item_id: String,
    /// Reason
    pub reason: SkipReason,
}

impl SkippedItem {
    /// Skip `item_id` for `reason`
    pub fn new(item_id: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            item_id: item_id.into(),
            reason,
        }
    }
}

/// Transaction hashes grouped by phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseHashes {
    /// Object creation transactions
    pub object_creation: Vec<TxHash>,
    /// Relationship creation and deferred deposit transactions
    pub relationship_creation: Vec<TxHash>,
    /// Redemption transactions
    pub redeem: Vec<TxHash>,
    /// Deposit transactions, including recovery seeds and retries
    pub deposit: Vec<TxHash>,
}

impl PhaseHashes {
    /// Total number of transactions
    pub fn len(&self) -> usize {
        self.object_creation.len() + self.relationship_creation.len() + self.redeem.len() + self.deposit.len()
    }

    /// Whether no transaction was sent
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Aggregated result of a successful submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Submission id
    pub submission_id: SubmissionId,
    /// Hashes per phase
    pub hashes: PhaseHashes,
    /// Objects (including categories) actually created
    pub objects_created: usize,
    /// Relationships actually created
    pub relationships_created: usize,
    /// Shares withdrawn across all redemptions, recovery seeds excluded
    #[serde(with = "amount_string")]
    pub total_withdrawn: u128,
    /// Assets sent into vaults: relationship creation values plus deposits,
    /// recovery seeds excluded
    #[serde(with = "amount_string")]
    pub total_deposited: u128,
    /// Items left out of the submission
    pub skipped: Vec<SkippedItem>,
}

impl ExecutionReport {
    /// Empty report for a submission
    pub fn new(submission_id: SubmissionId) -> Self {
        Self {
            submission_id,
            hashes: PhaseHashes::default(),
            objects_created: 0,
            relationships_created: 0,
            total_withdrawn: 0,
            total_deposited: 0,
            skipped: Vec::new(),
        }
    }

    /// Total number of transactions sent
    pub fn transaction_count(&self) -> usize {
        self.hashes.len()
    }
}
