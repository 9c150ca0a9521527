//! Mocks and fixtures shared by the application unit tests

use crate::application::progress::ProgressReporter;
use crate::domain::cart::CartItem;
use crate::domain::events::{EngineEvent, ExecutionStatus, SubmissionId};
use crate::domain::indexer::{IndexedRelationship, Indexer};
use crate::domain::ledger::{ContractConfig, Ledger, LedgerCall, TxReceipt};
use crate::error::{IndexerError, LedgerError};
use crate::types::{Address, Curve, Direction, TermId, TxHash};
use async_trait::async_trait;
use mockall::mock;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

mock! {
    pub TestLedger {}

    #[async_trait]
    impl Ledger for TestLedger {
        fn account(&self) -> Option<Address>;
        fn is_ready(&self) -> bool;
        async fn contract_config(&self) -> Result<ContractConfig, LedgerError>;
        async fn share_balance(&self, account: &Address, term_id: &TermId, curve_id: u64) -> Result<u128, LedgerError>;
        async fn simulate(&self, call: &LedgerCall) -> Result<(), LedgerError>;
        async fn submit(&self, call: &LedgerCall) -> Result<TxHash, LedgerError>;
        async fn wait_for_receipt(&self, hash: &TxHash) -> Result<TxReceipt, LedgerError>;
    }
}

mock! {
    pub TestIndexer {}

    #[async_trait]
    impl Indexer for TestIndexer {
        async fn find_relationship(&self, subject: &TermId, predicate: &TermId, object: &TermId) -> Result<Option<IndexedRelationship>, IndexerError>;
        async fn find_object_by_label(&self, label: &str) -> Result<Option<TermId>, IndexerError>;
    }
}

pub const CONTRACT: ContractConfig = ContractConfig {
    object_cost: 1_000,
    triple_cost: 4_000,
    min_deposit: 100,
};

pub fn reporter() -> (
    ProgressReporter,
    broadcast::Receiver<EngineEvent>,
    watch::Receiver<ExecutionStatus>,
) {
    let (events, rx) = broadcast::channel(64);
    let (status, status_rx) = watch::channel(ExecutionStatus::default());
    (
        ProgressReporter::new(SubmissionId::new(), events, Arc::new(status)),
        rx,
        status_rx,
    )
}

/// Item on an existing relationship
pub fn existing_item(id: &str, triple: &str, direction: Direction, curve: Curve, amount: u128) -> CartItem {
    CartItem {
        id: id.to_string(),
        object_id: Some(TermId::new(format!("{}-object", triple))),
        predicate_id: TermId::new("0xpredicate"),
        triple_id: Some(TermId::new(triple)),
        counter_triple_id: Some(TermId::new(format!("{}-counter", triple))),
        direction,
        curve,
        amount,
        opposing_position: None,
        new_object: None,
    }
}

/// Item whose object exists but whose relationship does not
pub fn new_relationship_item(id: &str, object: &str, direction: Direction, curve: Curve, amount: u128) -> CartItem {
    CartItem {
        id: id.to_string(),
        object_id: Some(TermId::new(object)),
        predicate_id: TermId::new("0xpredicate"),
        triple_id: None,
        counter_triple_id: None,
        direction,
        curve,
        amount,
        opposing_position: None,
        new_object: None,
    }
}
