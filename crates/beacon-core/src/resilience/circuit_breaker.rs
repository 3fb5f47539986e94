//! CircuitBreaker - 連続失敗した操作を一定時間ショートさせる
//!
//! # State transitions (per key)
//! ```text
//! Closed -> Open:   failure_count >= threshold
//! Open   -> Closed: 次の呼び出し時点で cooldown 経過済みなら（lazy）
//! Closed -> Open:   lazy close 後の失敗は即 open（failure_count は success でしか 0 に戻らない）
//! ```
//!
//! - key ごとに独立した状態（プロセス内メモリ）
//! - threshold / cooldown は `CircuitBreakerConfig` から毎回読む
//! - 状態は std Mutex で保護し、ロック中に操作を await しない

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::config::{BreakerSettings, CircuitBreakerConfig};
use crate::error::BeaconError;
use crate::ports::{Clock, SystemClock};

/// Snapshot of one key's breaker state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitState {
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    pub open: bool,
    pub last_failure_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    defaults: BreakerSettings,
    config: Option<Arc<CircuitBreakerConfig>>,
    clock: Arc<dyn Clock>,
    states: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(defaults: BreakerSettings) -> Self {
        Self {
            defaults,
            config: None,
            clock: Arc::new(SystemClock),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_config(mut self, config: Arc<CircuitBreakerConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> BreakerSettings {
        match &self.config {
            Some(config) => config.settings(&self.defaults),
            None => BreakerSettings {
                failure_threshold: self.defaults.failure_threshold.max(1),
                cooldown: self.defaults.cooldown,
            },
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, CircuitState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `operation` under the breaker for `key`.
    ///
    /// While the circuit is open the operation is not invoked and
    /// `BeaconError::CircuitOpen` is returned instead.
    pub async fn call<F, Fut, T>(&self, key: &str, operation: F) -> Result<T, BeaconError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BeaconError>>,
    {
        let settings = self.settings();
        self.admit(key, &settings)?;

        let result = operation().await;
        match &result {
            Ok(_) => self.on_success(key),
            Err(err) => self.on_failure(key, &settings, err),
        }
        result
    }

    /// Rejects the call while open; lazily closes once the cooldown has passed.
    fn admit(&self, key: &str, settings: &BreakerSettings) -> Result<(), BeaconError> {
        let now = self.clock.now();
        let mut states = self.states();
        let Some(state) = states.get_mut(key) else {
            return Ok(());
        };
        if !state.open {
            return Ok(());
        }

        let elapsed = state
            .last_failure_at
            .and_then(|t| (now - t).to_std().ok())
            .unwrap_or(Duration::ZERO);
        if elapsed < settings.cooldown {
            return Err(BeaconError::CircuitOpen {
                key: key.to_string(),
                retry_in: settings.cooldown - elapsed,
            });
        }

        state.open = false;
        info!(key, failure_count = state.failure_count, "circuit closed after cooldown");
        Ok(())
    }

    fn on_success(&self, key: &str) {
        let mut states = self.states();
        if let Some(state) = states.get_mut(key) {
            state.failure_count = 0;
            state.open = false;
        }
    }

    fn on_failure(&self, key: &str, settings: &BreakerSettings, err: &BeaconError) {
        let now = self.clock.now();
        let mut states = self.states();
        let state = states.entry(key.to_string()).or_default();
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_at = Some(now);

        if state.failure_count >= settings.failure_threshold {
            if !state.open {
                warn!(
                    key,
                    failure_count = state.failure_count,
                    cooldown_ms = settings.cooldown.as_millis() as u64,
                    error = %err,
                    "circuit opened"
                );
            }
            state.open = true;
        }
    }

    /// Current state for `key` (closed with zero failures if never seen).
    pub fn state(&self, key: &str) -> CircuitState {
        self.states().get(key).copied().unwrap_or_default()
    }

    /// All known keys, sorted.
    pub fn snapshot(&self) -> BTreeMap<String, CircuitState> {
        self.states()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Forget everything about `key`.
    pub fn reset(&self, key: &str) {
        self.states().remove(key);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("settings", &self.settings())
            .finish_non_exhaustive()
    }
}
