//! Processor middleware.
//!
//! 各 layer は内側の `TaskProcessor` を包み、自身も `TaskProcessor` になる。
//! 合成は構築時に明示する:
//!
//! ```ignore
//! let processor = CircuitBreakerLayer::new(
//!     MetricsLayer::new(RetryLayer::new(dispatcher, retry), metrics.clone(), "meteo"),
//!     breaker.clone(),
//!     "meteo",
//! );
//! ```

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use super::circuit_breaker::CircuitBreaker;
use super::retry::RetryPolicy;
use crate::domain::TaskType;
use crate::error::BeaconError;
use crate::metrics::PerformanceMetrics;
use crate::ports::TaskProcessor;

/// Retries the inner processor with backoff.
pub struct RetryLayer<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: TaskProcessor> RetryLayer<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<P: TaskProcessor> TaskProcessor for RetryLayer<P> {
    async fn process(&self, task_type: &TaskType, payload: &Value) -> Result<Value, BeaconError> {
        let inner = &self.inner;
        self.policy
            .run(move || inner.process(task_type, payload))
            .await
    }
}

/// Short-circuits the inner processor while the circuit for `key` is open.
pub struct CircuitBreakerLayer<P> {
    inner: P,
    breaker: Arc<CircuitBreaker>,
    key: String,
}

impl<P: TaskProcessor> CircuitBreakerLayer<P> {
    pub fn new(inner: P, breaker: Arc<CircuitBreaker>, key: impl Into<String>) -> Self {
        Self {
            inner,
            breaker,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl<P: TaskProcessor> TaskProcessor for CircuitBreakerLayer<P> {
    async fn process(&self, task_type: &TaskType, payload: &Value) -> Result<Value, BeaconError> {
        let inner = &self.inner;
        self.breaker
            .call(&self.key, move || inner.process(task_type, payload))
            .await
    }
}

/// Records duration and outcome of every inner call under `name`.
pub struct MetricsLayer<P> {
    inner: P,
    metrics: Arc<PerformanceMetrics>,
    name: String,
}

impl<P: TaskProcessor> MetricsLayer<P> {
    pub fn new(inner: P, metrics: Arc<PerformanceMetrics>, name: impl Into<String>) -> Self {
        Self {
            inner,
            metrics,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<P: TaskProcessor> TaskProcessor for MetricsLayer<P> {
    async fn process(&self, task_type: &TaskType, payload: &Value) -> Result<Value, BeaconError> {
        let started = Instant::now();
        let result = self.inner.process(task_type, payload).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => self.metrics.record(&self.name, elapsed, true, None),
            Err(err) => {
                let message = err.to_string();
                self.metrics
                    .record(&self.name, elapsed, false, Some(message.as_str()));
            }
        }
        result
    }
}
