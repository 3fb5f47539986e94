//! Live-tunable resilience configuration.
//!
//! Two layers:
//! - `RetrySettings` / `BreakerSettings`: plain typed structs, what the policies use.
//! - `RetryConfig` / `CircuitBreakerConfig`: namespaced key-value stores that an
//!   admin surface can write at runtime. Policies read them on every call.
//!
//! Stores accept any value. Range checks live in `validate()` and are the
//! caller's job; out-of-range values that slip through are clamped at use.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::RwLock;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::error::BeaconError;

/// Namespaced key-value store with built-in defaults.
///
/// Lookup order: live override -> built-in default -> caller fallback.
#[derive(Debug)]
pub struct ConfigStore {
    namespace: &'static str,
    defaults: BTreeMap<String, Value>,
    overrides: RwLock<BTreeMap<String, Value>>,
}

impl ConfigStore {
    pub fn new<'a>(
        namespace: &'static str,
        defaults: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Self {
        Self {
            namespace,
            defaults: defaults
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            overrides: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn defaults(&self) -> &BTreeMap<String, Value> {
        &self.defaults
    }

    /// Raw lookup without a caller fallback.
    pub fn get(&self, key: &str) -> Option<Value> {
        let overrides = self.overrides.read().unwrap_or_else(|e| e.into_inner());
        overrides
            .get(key)
            .or_else(|| self.defaults.get(key))
            .cloned()
    }

    /// Typed lookup. A stored value that does not fit `T` falls back too.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        match self.get(key) {
            Some(value) => match serde_json::from_value(value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(namespace = self.namespace, key, error = %e, "ignoring ill-typed config value");
                    fallback
                }
            },
            None => fallback,
        }
    }

    /// Integer lookup that also takes whole-number floats (`3.0`).
    pub fn get_count(&self, key: &str, fallback: i64) -> i64 {
        let Some(value) = self.get(key) else {
            return fallback;
        };
        if let Some(n) = value.as_i64() {
            return n;
        }
        match value.as_f64() {
            // `as` saturates on out-of-range floats
            Some(f) if f.is_finite() && f.fract() == 0.0 => f as i64,
            _ => {
                warn!(namespace = self.namespace, key, %value, "ignoring non-integer config value");
                fallback
            }
        }
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let mut overrides = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        overrides.insert(key.to_string(), value.into());
    }

    pub fn reset_to_defaults(&self) {
        let mut overrides = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        overrides.clear();
    }

    /// Effective values (defaults with overrides applied).
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let mut merged = self.defaults.clone();
        let overrides = self.overrides.read().unwrap_or_else(|e| e.into_inner());
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

// ----------------------------------------------------------------------------
// Retry
// ----------------------------------------------------------------------------

/// Retry tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total tries, including the first one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn new(attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            attempts,
            base_delay,
            backoff_multiplier,
        }
    }

    pub fn validate(&self) -> Result<(), BeaconError> {
        if self.attempts < 1 {
            return Err(BeaconError::Validation("attempts must be >= 1".into()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(BeaconError::Validation(
                "backoff multiplier must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Sleep before attempt `attempt` (0-indexed).
    ///
    /// delay = base_delay * backoff_multiplier^(attempt - 1), zero for the first try.
    ///
    /// Example with base_delay=1s, multiplier=2.0:
    /// - attempt 1: 1s
    /// - attempt 2: 2s
    /// - attempt 3: 4s
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Live retry configuration (`attempts`, `delay` in seconds, `backoff`).
#[derive(Debug)]
pub struct RetryConfig(ConfigStore);

impl RetryConfig {
    pub const NAMESPACE: &'static str = "retry";

    pub fn new() -> Self {
        let d = RetrySettings::default();
        Self(ConfigStore::new(
            Self::NAMESPACE,
            [
                ("attempts", json!(d.attempts)),
                ("delay", json!(d.base_delay.as_secs_f64())),
                ("backoff", json!(d.backoff_multiplier)),
            ],
        ))
    }

    /// Effective settings; `fallback` only fills keys missing from the store.
    pub fn settings(&self, fallback: &RetrySettings) -> RetrySettings {
        let attempts = self.get_count("attempts", i64::from(fallback.attempts));
        let delay: f64 = self.get_or("delay", fallback.base_delay.as_secs_f64());
        let backoff: f64 = self.get_or("backoff", fallback.backoff_multiplier);

        RetrySettings {
            attempts: u32::try_from(attempts.max(1)).unwrap_or(u32::MAX),
            base_delay: Duration::try_from_secs_f64(delay.max(0.0)).unwrap_or(Duration::ZERO),
            backoff_multiplier: if backoff.is_finite() { backoff.max(1.0) } else { 1.0 },
        }
    }

    /// Write a full settings struct.
    pub fn apply(&self, settings: &RetrySettings) {
        self.set("attempts", settings.attempts);
        self.set("delay", settings.base_delay.as_secs_f64());
        self.set("backoff", settings.backoff_multiplier);
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for RetryConfig {
    type Target = ConfigStore;

    fn deref(&self) -> &ConfigStore {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Circuit breaker
// ----------------------------------------------------------------------------

/// Circuit breaker tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(5),
        }
    }
}

impl BreakerSettings {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
        }
    }

    pub fn validate(&self) -> Result<(), BeaconError> {
        if self.failure_threshold < 1 {
            return Err(BeaconError::Validation("threshold must be >= 1".into()));
        }
        Ok(())
    }
}

/// Live circuit breaker configuration (`threshold`, `cooldown` in seconds).
#[derive(Debug)]
pub struct CircuitBreakerConfig(ConfigStore);

impl CircuitBreakerConfig {
    pub const NAMESPACE: &'static str = "circuit_breaker";

    pub fn new() -> Self {
        let d = BreakerSettings::default();
        Self(ConfigStore::new(
            Self::NAMESPACE,
            [
                ("threshold", json!(d.failure_threshold)),
                ("cooldown", json!(d.cooldown.as_secs_f64())),
            ],
        ))
    }

    pub fn settings(&self, fallback: &BreakerSettings) -> BreakerSettings {
        let threshold = self.get_count("threshold", i64::from(fallback.failure_threshold));
        let cooldown: f64 = self.get_or("cooldown", fallback.cooldown.as_secs_f64());

        BreakerSettings {
            failure_threshold: u32::try_from(threshold.max(1)).unwrap_or(u32::MAX),
            cooldown: Duration::try_from_secs_f64(cooldown.max(0.0)).unwrap_or(Duration::ZERO),
        }
    }

    pub fn apply(&self, settings: &BreakerSettings) {
        self.set("threshold", settings.failure_threshold);
        self.set("cooldown", settings.cooldown.as_secs_f64());
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for CircuitBreakerConfig {
    type Target = ConfigStore;

    fn deref(&self) -> &ConfigStore {
        &self.0
    }
}
