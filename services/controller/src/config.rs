//! Configuration for the controller.

use std::time::Duration;

use anyhow::{Context, Result};
use confroll_reconcile::{
    BatchStrategy, DEFAULT_POLL_INTERVAL, DEFAULT_READY_TIMEOUT, DEFAULT_SETTLE_INTERVAL,
};

/// Timing of the health gate between the two batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignTimings {
    /// Delay after the first batch before health polling starts.
    pub settle_interval: Duration,

    /// Interval between health polls.
    pub poll_interval: Duration,

    /// How long replacements have to become ready.
    pub ready_timeout: Duration,
}

impl Default for CampaignTimings {
    fn default() -> Self {
        Self {
            settle_interval: DEFAULT_SETTLE_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Restrict the ConfigMap watch to one namespace.
    pub watch_namespace: Option<String>,

    /// How eligible pods are split into batches.
    pub batching: BatchStrategy,

    pub timings: CampaignTimings,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let log_level =
            std::env::var("CONFROLL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let watch_namespace = std::env::var("CONFROLL_WATCH_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty());

        let batching = batching_from(std::env::var("CONFROLL_BATCHING").ok())?;

        let defaults = CampaignTimings::default();
        let timings = CampaignTimings {
            settle_interval: secs_from_env(
                "CONFROLL_SETTLE_INTERVAL_SECS",
                defaults.settle_interval,
            ),
            poll_interval: secs_from_env("CONFROLL_POLL_INTERVAL_SECS", defaults.poll_interval),
            ready_timeout: secs_from_env("CONFROLL_READY_TIMEOUT_SECS", defaults.ready_timeout),
        };

        Ok(Self {
            log_level,
            watch_namespace,
            batching,
            timings,
        })
    }
}

/// Parse the batching strategy, defaulting when unset.
fn batching_from(value: Option<String>) -> Result<BatchStrategy> {
    match value {
        Some(value) => value
            .parse::<BatchStrategy>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("invalid CONFROLL_BATCHING: {value}")),
        None => Ok(BatchStrategy::default()),
    }
}

fn secs_from_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
