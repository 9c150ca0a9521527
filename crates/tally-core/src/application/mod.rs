/// Submission orchestrator
pub mod engine;

/// Per-submission state shared by the phases
pub mod context;

/// Event and status publishing
pub mod progress;

/// Simulate, submit and confirm ledger writes
pub mod transaction;

/// Bounded indexer polling
pub mod poller;

/// Object and category creation
pub mod object_creator;

/// Relationship creation and deferred deposits
pub mod relationship_creator;

/// Deposits on existing relationships
pub mod deposit_executor;

/// Position withdrawals
pub mod redeem_executor;

#[cfg(test)]
pub(crate) mod test_support;
