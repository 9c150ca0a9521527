/// Cart items and relationship keys
pub mod cart;

/// Deduplication and partitioning of a cart
pub mod classifier;

/// Minimum-amount checks
pub mod validator;

/// Engine events and progress state
pub mod events;

/// Submission results
pub mod report;

/// Ledger interface and call shapes
pub mod ledger;

/// Indexer interface
pub mod indexer;
