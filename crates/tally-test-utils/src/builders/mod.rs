//! Builders for test data.

mod cart;

pub use cart::*;
