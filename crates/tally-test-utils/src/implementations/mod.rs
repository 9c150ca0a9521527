//! Test implementations (fakes) of the engine's external services.
//!
//! These keep real state in memory so tests can assert on what the ledger
//! ended up holding, not just on which calls were made.

mod in_memory_indexer;
mod simulated_ledger;

pub use in_memory_indexer::*;
pub use simulated_ledger::*;
