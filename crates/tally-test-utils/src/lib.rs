//! Testing utilities for the Tally vote engine.
//!
//! This crate provides test implementations (fakes) of the ledger and the
//! indexer, builders for cart items, and a tracing setup helper for tests.

pub mod builders;
pub mod implementations;
pub mod util;

pub use builders::CartItemBuilder;
pub use implementations::{InMemoryIndexer, SimulatedLedger};
pub use util::init_test_tracing;
