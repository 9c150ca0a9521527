//! Logging and metrics for the Tally vote engine.
//!
//! The engine itself only emits `tracing` spans and typed events; this crate
//! installs the subscriber and turns the event stream into metrics.

use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::logging::LogExt;

pub mod logging;
pub mod metrics;

/// Configuration for initializing logging and metrics
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log level filter (e.g. "info,tally_core=debug")
    pub log_filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
    /// Record metrics from engine events
    pub enable_metrics: bool,
    /// Address of the Prometheus scrape endpoint, when exported
    pub metrics_address: Option<String>,
    /// Submissions without a terminal event are forgotten after this long
    pub stale_after: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "tally".to_string(),
            log_filter: "info".to_string(),
            json_logs: false,
            enable_metrics: true,
            metrics_address: None,
            stale_after: Duration::from_secs(600),
        }
    }
}

/// `TALLY_*` variables `MonitoringConfig` reads; other engine keys are ignored
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvOverrides {
    log: Option<String>,
    log_format: Option<String>,
    metrics: Option<bool>,
    metrics_addr: Option<String>,
}

impl MonitoringConfig {
    /// Defaults overridden by `TALLY_LOG`, `TALLY_LOG_FORMAT`,
    /// `TALLY_METRICS` and `TALLY_METRICS_ADDR`
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(None)
    }

    fn from_vars(vars: Option<config::Map<String, String>>) -> anyhow::Result<Self> {
        let overrides: EnvOverrides = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("TALLY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .context("Invalid monitoring configuration in environment")?;

        let mut config = Self::default();
        if let Some(filter) = overrides.log {
            config.log_filter = filter;
        }
        if let Some(format) = overrides.log_format {
            config.json_logs = format.eq_ignore_ascii_case("json");
        }
        if let Some(enabled) = overrides.metrics {
            config.enable_metrics = enabled;
        }
        config.metrics_address = overrides.metrics_addr;
        Ok(config)
    }
}

/// Initialize logging and, when enabled, the metrics exporter
pub fn init(config: &MonitoringConfig) -> anyhow::Result<()> {
    logging::init_logging(config)?;

    if config.enable_metrics {
        if let Some(address) = &config.metrics_address {
            metrics::install_exporter(address).log_err("Metrics exporter not installed")?;
        }
    }

    info!(service_name = %config.service_name, "Monitoring initialized");
    Ok(())
}

pub use crate::metrics::{spawn_event_recorder, EngineMetrics, RecorderSummary};
