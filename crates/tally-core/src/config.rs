//! Configuration for the vote engine
//!
//! Defaults cover a typical deployment; a file and `TALLY_*` environment
//! variables can override any field.

use crate::error::EngineError;
use crate::types::{amount_string, CurveIds};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Engine configuration, passed in at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest deficit below an item's minimum that is rounded up instead of
    /// rejected
    #[serde(with = "amount_string")]
    pub dust_tolerance: u128,

    /// Delay between indexer polls, in milliseconds
    pub poll_interval_ms: u64,

    /// Indexer polls before giving up
    pub poll_max_attempts: u32,

    /// Ledger ids of the bonding curves
    pub curve_ids: CurveIds,

    /// Fail the submission instead of dropping against votes that target
    /// relationships which do not exist yet
    pub reject_against_on_new_relationship: bool,

    /// GraphQL endpoint of the indexer
    pub indexer_url: Option<String>,

    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // 0.0001 of an 18-decimal unit: the precision amounts are displayed with
            dust_tolerance: 100_000_000_000_000,
            poll_interval_ms: 2_000,
            poll_max_attempts: 15,
            curve_ids: CurveIds::default(),
            reject_against_on_new_relationship: false,
            indexer_url: None,
            event_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Delay between indexer polls
    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load configuration from an optional file, then `TALLY_*` environment
    /// variables. Nested keys use a double underscore, e.g.
    /// `TALLY_CURVE_IDS__PROGRESSIVE=4`.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        Self::load_from(path, None)
    }

    /// `load` with the environment replaced by `vars`
    fn load_from(
        path: Option<&Path>,
        vars: Option<config::Map<String, String>>,
    ) -> Result<Self, EngineError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("TALLY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            poll_interval_ms = config.poll_interval_ms,
            poll_max_attempts = config.poll_max_attempts,
            indexer_url = ?config.indexer_url,
            "Engine configuration loaded"
        );
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.poll_max_attempts == 0 {
            return Err(EngineError::Config(
                "poll_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.curve_ids.linear == self.curve_ids.progressive {
            return Err(EngineError::Config(
                "linear and progressive curves must have different ids".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::Config(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
