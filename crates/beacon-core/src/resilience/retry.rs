//! RetryPolicy - 失敗した非同期操作を指数バックオフで再実行する
//!
//! すべてのエラーを retryable として扱う（分類はしない）。
//! 設定は `RetryConfig` から毎回読むので、実行中に admin 側から変更できる。

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use super::config::{RetryConfig, RetrySettings};

/// Retry-with-backoff around an async operation.
///
/// # 使用例
/// ```ignore
/// let policy = RetryPolicy::new(RetrySettings::default()).with_config(config.clone());
/// let value = policy.run(|| async move { flaky().await }).await?;
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Used for keys the live config does not define.
    defaults: RetrySettings,
    config: Option<Arc<RetryConfig>>,
}

impl RetryPolicy {
    pub fn new(defaults: RetrySettings) -> Self {
        Self {
            defaults,
            config: None,
        }
    }

    pub fn with_config(mut self, config: Arc<RetryConfig>) -> Self {
        self.config = Some(config);
        self
    }

    /// Settings in effect for the next `run`.
    pub fn settings(&self) -> RetrySettings {
        match &self.config {
            Some(config) => config.settings(&self.defaults),
            None => RetrySettings {
                attempts: self.defaults.attempts.max(1),
                base_delay: self.defaults.base_delay,
                backoff_multiplier: self.defaults.backoff_multiplier.max(1.0),
            },
        }
    }

    /// Run `operation` until it succeeds or the attempts run out.
    ///
    /// On exhaustion the last error is returned unchanged.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let settings = self.settings();
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                let delay = settings.delay_before(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retry backoff");
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= settings.attempts {
                        warn!(attempts = settings.attempts, error = %err, "giving up after retries");
                        return Err(err);
                    }
                    warn!(
                        attempt,
                        max = settings.attempts,
                        error = %err,
                        "attempt failed, retrying"
                    );
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetrySettings::default())
    }
}
