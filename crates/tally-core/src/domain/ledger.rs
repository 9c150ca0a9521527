use crate::error::LedgerError;
use crate::types::{amount_string, Address, TermId, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Protocol-wide constants read from the ledger at the start of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractConfig {
    /// Value attached to each object creation
    #[serde(with = "amount_string")]
    pub object_cost: u128,

    /// Base cost of creating a relationship
    #[serde(with = "amount_string")]
    pub triple_cost: u128,

    /// Minimum accepted deposit
    #[serde(with = "amount_string")]
    pub min_deposit: u128,
}

impl ContractConfig {
    /// Minimum amount when a relationship is created and deposited on at once
    #[inline]
    pub fn min_create_and_deposit(&self) -> u128 {
        self.triple_cost.saturating_add(self.min_deposit)
    }
}

/// Create objects by label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateObjects {
    /// Labels of the objects
    pub labels: Vec<String>,
    /// Value attached to each creation
    pub assets: Vec<u128>,
}

/// Create relationships, each with its own initial deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRelationships {
    /// Subjects
    pub subjects: Vec<TermId>,
    /// Relationship kinds
    pub predicates: Vec<TermId>,
    /// Objects
    pub objects: Vec<TermId>,
    /// Assets per relationship: creation cost plus any initial deposit
    pub assets: Vec<u128>,
}

impl CreateRelationships {
    /// Number of relationships in the call
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Whether the call creates nothing
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// Deposit into many vaults in one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositBatch {
    /// Account receiving the shares
    pub receiver: Address,
    /// Vault terms
    pub term_ids: Vec<TermId>,
    /// Ledger curve ids
    pub curve_ids: Vec<u64>,
    /// Assets per vault
    pub assets: Vec<u128>,
    /// Slippage guard per vault
    pub min_shares: Vec<u128>,
}

impl DepositBatch {
    /// Empty batch for a receiver
    pub fn new(receiver: Address) -> Self {
        Self {
            receiver,
            term_ids: Vec::new(),
            curve_ids: Vec::new(),
            assets: Vec::new(),
            min_shares: Vec::new(),
        }
    }

    /// Add a deposit with no slippage guard
    pub fn push(&mut self, term_id: TermId, curve_id: u64, assets: u128) {
        self.term_ids.push(term_id);
        self.curve_ids.push(curve_id);
        self.assets.push(assets);
        self.min_shares.push(0);
    }

    /// Number of deposits
    pub fn len(&self) -> usize {
        self.term_ids.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.term_ids.is_empty()
    }

    /// Sum of all deposited assets
    pub fn total_assets(&self) -> u128 {
        self.assets.iter().fold(0u128, |acc, a| acc.saturating_add(*a))
    }
}

/// Redeem shares from many vaults in one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemBatch {
    /// Account receiving the assets
    pub receiver: Address,
    /// Vault terms
    pub term_ids: Vec<TermId>,
    /// Ledger curve ids
    pub curve_ids: Vec<u64>,
    /// Shares per vault
    pub shares: Vec<u128>,
    /// Slippage guard per vault
    pub min_assets: Vec<u128>,
}

impl RedeemBatch {
    /// Empty batch for a receiver
    pub fn new(receiver: Address) -> Self {
        Self {
            receiver,
            term_ids: Vec::new(),
            curve_ids: Vec::new(),
            shares: Vec::new(),
            min_assets: Vec::new(),
        }
    }

    /// Add a redemption with no slippage guard
    pub fn push(&mut self, term_id: TermId, curve_id: u64, shares: u128) {
        self.term_ids.push(term_id);
        self.curve_ids.push(curve_id);
        self.shares.push(shares);
        self.min_assets.push(0);
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.term_ids.is_empty()
    }

    /// Sum of all redeemed shares
    pub fn total_shares(&self) -> u128 {
        self.shares.iter().fold(0u128, |acc, s| acc.saturating_add(*s))
    }
}

/// A ledger write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCall {
    /// Create objects
    CreateObjects(CreateObjects),
    /// Create relationships
    CreateRelationships(CreateRelationships),
    /// Batched deposit
    DepositBatch(DepositBatch),
    /// Batched redemption
    RedeemBatch(RedeemBatch),
}

impl LedgerCall {
    /// Short name used in logs and events
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerCall::CreateObjects(_) => "create_objects",
            LedgerCall::CreateRelationships(_) => "create_relationships",
            LedgerCall::DepositBatch(_) => "deposit_batch",
            LedgerCall::RedeemBatch(_) => "redeem_batch",
        }
    }

    /// Value sent along with the call
    pub fn value(&self) -> u128 {
        let sum = |values: &[u128]| values.iter().fold(0u128, |acc, v| acc.saturating_add(*v));
        match self {
            LedgerCall::CreateObjects(call) => sum(&call.assets),
            LedgerCall::CreateRelationships(call) => sum(&call.assets),
            LedgerCall::DepositBatch(call) => call.total_assets(),
            LedgerCall::RedeemBatch(_) => 0,
        }
    }
}

/// Final status of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    /// Transaction succeeded
    Success,
    /// Transaction reverted with this reason
    Reverted(String),
}

/// Receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash
    pub hash: TxHash,
    /// Outcome
    pub status: ReceiptStatus,
    /// Terms created by the transaction, in call order
    #[serde(default)]
    pub created_terms: Vec<TermId>,
}

/// The remote ledger: protocol reads and the simulate/submit/receipt write path.
///
/// Implementations classify raw failures with [`LedgerError::from_raw`] so
/// callers can match on stable codes.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Connected signer account, if a wallet is connected
    fn account(&self) -> Option<Address>;

    /// Whether the signing client is ready to send transactions
    fn is_ready(&self) -> bool;

    /// Read protocol configuration
    async fn contract_config(&self) -> Result<ContractConfig, LedgerError>;

    /// Shares `account` holds in the vault (`term_id`, `curve_id`)
    async fn share_balance(
        &self,
        account: &Address,
        term_id: &TermId,
        curve_id: u64,
    ) -> Result<u128, LedgerError>;

    /// Dry-run a write against current state
    async fn simulate(&self, call: &LedgerCall) -> Result<(), LedgerError>;

    /// Sign and broadcast a write
    async fn submit(&self, call: &LedgerCall) -> Result<TxHash, LedgerError>;

    /// Wait until a broadcast transaction is mined
    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<TxReceipt, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_create_and_deposit() {
        let config = ContractConfig {
            object_cost: 10,
            triple_cost: 40,
            min_deposit: 2,
        };
        assert_eq!(config.min_create_and_deposit(), 42);
    }

    #[test]
    fn test_deposit_batch_builds_parallel_arrays() {
        let mut batch = DepositBatch::new(Address::new("0xme"));
        batch.push(TermId::new("0xa"), 1, 5);
        batch.push(TermId::new("0xb"), 2, 7);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.curve_ids, vec![1, 2]);
        assert_eq!(batch.min_shares, vec![0, 0]);
        assert_eq!(batch.total_assets(), 12);

        let call = LedgerCall::DepositBatch(batch);
        assert_eq!(call.kind(), "deposit_batch");
        assert_eq!(call.value(), 12);
    }

    #[test]
    fn test_redeem_carries_no_value() {
        let mut batch = RedeemBatch::new(Address::new("0xme"));
        batch.push(TermId::new("0xa"), 1, 99);
        assert_eq!(batch.total_shares(), 99);
        assert_eq!(LedgerCall::RedeemBatch(batch).value(), 0);
    }
}
