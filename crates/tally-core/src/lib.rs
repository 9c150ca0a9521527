//!
//! Tally Core - batch vote execution engine
//!
//! Turns a cart of vote intents into a short, correctly ordered sequence of
//! ledger transactions: object creation, relationship creation, withdrawals
//! of opposing positions, and deposits. The ledger and its indexer are
//! reached through the [`Ledger`] and [`Indexer`] traits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - cart model, classification, validation, ledger and indexer interfaces
pub mod domain;

/// Application services - the phases of a submission and the orchestrator
pub mod application;

/// Adapters to external services
pub mod adapters;

/// Engine configuration
pub mod config;

/// Error types
pub mod error;

/// Core value types
pub mod types;

// Re-export main API types for easy use
pub use adapters::graphql::GraphqlIndexer;
pub use application::engine::{Submission, VoteEngine};
pub use config::EngineConfig;
pub use domain::cart::{CartItem, CreatedTripleInfo, NewObject, OpposingPosition, TripleKey};
pub use domain::classifier::{classify, Classification, CurveMix};
pub use domain::events::{
    EngineEvent, EngineEventKind, ExecutionState, ExecutionStatus, Phase, SubmissionId,
};
pub use domain::indexer::{IndexedRelationship, Indexer};
pub use domain::ledger::{
    ContractConfig, CreateObjects, CreateRelationships, DepositBatch, Ledger, LedgerCall,
    ReceiptStatus, RedeemBatch, TxReceipt,
};
pub use domain::report::{ExecutionReport, SkipReason, SkippedItem};
pub use domain::validator::validate_amounts;
pub use error::{
    classify_ledger_message, EngineError, ExecutionFailure, FailureCode, IndexerError,
    LedgerError, LedgerErrorCode, PollError, Shortfall,
};
pub use types::{Address, Curve, CurveIds, Direction, TermId, TxHash};
