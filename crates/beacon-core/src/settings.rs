//! QueueSettings - TaskQueue の起動設定
//!
//! 環境変数から読む（CLI 側で `.env` を先に読み込む）。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BeaconError;

pub const ENV_WORKERS: &str = "BEACON_WORKERS";
pub const ENV_POLL_INTERVAL_MS: &str = "BEACON_POLL_INTERVAL_MS";
pub const ENV_SHUTDOWN_TIMEOUT_SECS: &str = "BEACON_SHUTDOWN_TIMEOUT_SECS";
pub const ENV_RETENTION_HOURS: &str = "BEACON_RETENTION_HOURS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Size of the worker pool. Fixed for the lifetime of the queue.
    pub num_workers: usize,
    /// How long a worker waits on the FIFO before re-checking the stop signal.
    pub poll_interval: Duration,
    /// Per-worker join timeout used by `stop`.
    pub shutdown_timeout: Duration,
    /// Age after which terminal tasks are swept by `clear_completed`.
    pub retention: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            num_workers: 2,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

impl QueueSettings {
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), BeaconError> {
        if self.num_workers == 0 {
            return Err(BeaconError::Configuration(
                "num_workers must be >= 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(BeaconError::Configuration(
                "poll_interval must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Read settings from the process environment; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, BeaconError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BeaconError> {
        let defaults = Self::default();
        let settings = Self {
            num_workers: parse_var(&lookup, ENV_WORKERS)?.unwrap_or(defaults.num_workers),
            poll_interval: parse_var(&lookup, ENV_POLL_INTERVAL_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            shutdown_timeout: parse_var(&lookup, ENV_SHUTDOWN_TIMEOUT_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            retention: parse_var(&lookup, ENV_RETENTION_HOURS)?
                .map(|h: u64| Duration::from_secs(h.saturating_mul(3600)))
                .unwrap_or(defaults.retention),
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, BeaconError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            BeaconError::Configuration(format!("{key} must be a non-negative integer, got {raw:?}"))
        }),
    }
}
