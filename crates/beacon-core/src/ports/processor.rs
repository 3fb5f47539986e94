//! TaskProcessor port - タスクの実処理（翻訳・テンプレート・配送など）
//!
//! Queue は processor の中身を知らない。retry / circuit breaker も
//! processor 側のラッパー（`resilience::layers`）で合成する。

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::TaskType;
use crate::error::BeaconError;

/// The callback installed on a `TaskQueue`.
///
/// Takes the task's type and payload, returns the result stored on the task.
/// Any `Err` marks the task FAILED with the error's `Display` text.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(
        &self,
        task_type: &TaskType,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, BeaconError>;
}

#[async_trait]
impl<P: TaskProcessor + ?Sized> TaskProcessor for Arc<P> {
    async fn process(
        &self,
        task_type: &TaskType,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, BeaconError> {
        (**self).process(task_type, payload).await
    }
}

/// Adapts a synchronous closure into a `TaskProcessor`.
///
/// ```ignore
/// queue.set_processor(FnProcessor::new(|_ty, _payload| Ok(json!({"ok": true}))));
/// ```
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&TaskType, &serde_json::Value) -> Result<serde_json::Value, BeaconError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> TaskProcessor for FnProcessor<F>
where
    F: Fn(&TaskType, &serde_json::Value) -> Result<serde_json::Value, BeaconError> + Send + Sync,
{
    async fn process(
        &self,
        task_type: &TaskType,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, BeaconError> {
        (self.f)(task_type, payload)
    }
}
