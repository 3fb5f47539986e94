//! InMemoryDeliveryQueue - プロセス内 FIFO
//!
//! # 実装詳細
//! - `VecDeque<TaskId>` を std Mutex で保護（ロック中に await しない）
//! - `Notify` で push 時に待機中の pop を起こす
//! - unfinished カウンタ + `Notify` で join（全件 ack 待ち）を実現

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::TaskId;
use crate::ports::DeliveryQueue;

#[derive(Debug, Default)]
struct FifoState {
    items: VecDeque<TaskId>,
    unfinished: usize,
}

/// InMemoryDeliveryQueue はプロセス内の FIFO
///
/// # 使用例
/// ```ignore
/// let fifo = InMemoryDeliveryQueue::new();
/// fifo.push(task_id);
/// let next = fifo.pop(Duration::from_secs(1)).await;
/// fifo.ack();
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDeliveryQueue {
    state: Mutex<FifoState>,
    /// push 時の通知用
    available: Notify,
    /// unfinished == 0 になった時の通知用
    drained: Notify,
}

impl InMemoryDeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FifoState> {
        // push/pop はパニックしないので poison は実質起きないが、起きても中身は有効
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryDeliveryQueue {
    fn push(&self, task_id: TaskId) {
        {
            let mut state = self.state();
            state.items.push_back(task_id);
            state.unfinished += 1;
        }
        self.available.notify_one();
    }

    async fn pop(&self, timeout: Duration) -> Option<TaskId> {
        let deadline = Instant::now() + timeout;
        loop {
            // notified() を先に作っておけば、check と await の間の push を取りこぼさない
            // (notify_one は待機者がいなければ permit を残す)
            let notified = self.available.notified();

            let next = self.state().items.pop_front();
            if let Some(task_id) = next {
                return Some(task_id);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    fn ack(&self) {
        let drained = {
            let mut state = self.state();
            state.unfinished = state.unfinished.saturating_sub(1);
            state.unfinished == 0
        };
        if drained {
            self.drained.notify_waiters();
        }
    }

    fn len(&self) -> usize {
        self.state().items.len()
    }

    fn unfinished(&self) -> usize {
        self.state().unfinished
    }

    async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // notify_waiters は登録済みの waiter しか起こさないので先に enable する
            notified.as_mut().enable();

            let unfinished = self.state().unfinished;
            if unfinished == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ulid::Ulid;

    fn new_id() -> TaskId {
        TaskId::from_ulid(Ulid::new())
    }

    #[tokio::test]
    async fn test_push_pop_roundtrip() {
        let queue = InMemoryDeliveryQueue::new();
        let task_id = new_id();
        queue.push(task_id);
        assert_eq!(queue.len(), 1);

        let popped = queue.pop(Duration::from_secs(1)).await;
        assert_eq!(popped, Some(task_id));
        assert!(queue.is_empty());
        assert_eq!(queue.unfinished(), 1);
    }

    #[tokio::test]
    async fn test_pop_preserves_push_order() {
        let queue = InMemoryDeliveryQueue::new();
        let ids: Vec<TaskId> = (0..5).map(|_| new_id()).collect();
        for id in &ids {
            queue.push(*id);
        }

        let mut popped = Vec::new();
        while let Some(id) = queue.pop(Duration::from_millis(10)).await {
            popped.push(id);
        }
        assert_eq!(popped, ids);
    }

    #[tokio::test]
    async fn test_pop_timeout() {
        let queue = InMemoryDeliveryQueue::new();
        let start = Instant::now();
        let popped = queue.pop(Duration::from_millis(100)).await;
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn test_push_wakes_pop() {
        let queue = Arc::new(InMemoryDeliveryQueue::new());
        let task_id = new_id();

        let pop_future = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop(Duration::from_secs(5)).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.push(task_id);

        let popped = pop_future.await.unwrap();
        assert_eq!(popped, Some(task_id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_id_is_popped_once() {
        let queue = Arc::new(InMemoryDeliveryQueue::new());
        for _ in 0..200 {
            queue.push(new_id());
        }

        let mut poppers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            poppers.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(id) = queue.pop(Duration::from_millis(20)).await {
                    got.push(id);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for p in poppers {
            all.extend(p.await.unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 200);
        assert_eq!(unique.len(), 200);
    }

    #[tokio::test]
    async fn test_join_waits_for_ack() {
        let queue = Arc::new(InMemoryDeliveryQueue::new());
        queue.push(new_id());
        queue.push(new_id());

        let joiner = tokio::spawn({
            let queue = queue.clone();
            async move { queue.join().await }
        });

        queue.pop(Duration::from_millis(10)).await.unwrap();
        queue.ack();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!joiner.is_finished());

        queue.pop(Duration::from_millis(10)).await.unwrap();
        queue.ack();
        tokio::time::timeout(Duration::from_secs(1), joiner)
            .await
            .expect("join should return once everything is acked")
            .unwrap();
        assert_eq!(queue.unfinished(), 0);
    }

    #[tokio::test]
    async fn test_join_on_empty_queue_returns_immediately() {
        let queue = InMemoryDeliveryQueue::new();
        tokio::time::timeout(Duration::from_millis(100), queue.join())
            .await
            .unwrap();
    }
}
