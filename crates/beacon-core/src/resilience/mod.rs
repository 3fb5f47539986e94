//! Resilience - retry / circuit breaker と、その live 設定
//!
//! - **config**: `RetryConfig` / `CircuitBreakerConfig`（実行中に書き換え可能）
//! - **retry**: `RetryPolicy`（指数バックオフ）
//! - **circuit_breaker**: `CircuitBreaker`（key ごとの状態）
//! - **layers**: `TaskProcessor` を包む middleware

pub mod circuit_breaker;
pub mod config;
pub mod layers;
pub mod retry;

pub use self::circuit_breaker::{CircuitBreaker, CircuitState};
pub use self::config::{
    BreakerSettings, CircuitBreakerConfig, ConfigStore, RetryConfig, RetrySettings,
};
pub use self::layers::{CircuitBreakerLayer, MetricsLayer, RetryLayer};
pub use self::retry::RetryPolicy;
