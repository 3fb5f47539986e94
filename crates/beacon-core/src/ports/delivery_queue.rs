//! DeliveryQueue port - 配送キュー（FIFO）
//!
//! DeliveryQueue は task_id のみを流します（状態や payload は TaskRegistry 側）。
//! ロックも TaskRegistry とは別：dequeue と状態更新で worker が同じロックを奪い合わない。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::TaskId;

/// DeliveryQueue は task_id を配送するための FIFO
///
/// # 設計原則
/// - push は決してブロックしない（上限なし、backpressure なし）
/// - pop は timeout 付き blocking pop。1 つの id は 1 つの pop にしか渡らない
/// - pop した id は処理後に `ack` する（drain / join を観測可能にするため）
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    fn push(&self, task_id: TaskId);

    /// Wait at most `timeout` for the next id.
    async fn pop(&self, timeout: Duration) -> Option<TaskId>;

    /// Acknowledge that one popped id has been fully handled.
    fn ack(&self);

    /// Ids pushed but not popped yet.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids pushed but not acknowledged yet.
    fn unfinished(&self) -> usize;

    /// Wait until every pushed id has been acknowledged.
    async fn join(&self);
}
