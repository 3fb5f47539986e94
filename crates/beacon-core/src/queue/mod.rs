//! TaskQueue - worker pool 付きのインメモリ task queue
//!
//! # 構成
//! - **registry**: TaskRecord と counters（tokio Mutex 1 つで保護）
//! - **fifo**: `DeliveryQueue`（TaskId だけを運ぶ。registry とは別ロック）
//! - **workers**: `WorkerGroup`（start で spawn、stop で join）
//!
//! Queue は processor の中身を知らない。retry / circuit breaker は
//! `resilience::layers` で processor 側に合成する。

mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use self::registry::TaskRegistry;
use crate::domain::{QueueStats, TaskId, TaskRecord, TaskSnapshot, TaskType};
use crate::error::BeaconError;
use crate::impls::InMemoryDeliveryQueue;
use crate::ports::{Clock, DeliveryQueue, IdGenerator, SystemClock, TaskProcessor, UlidGenerator};
use crate::settings::QueueSettings;
use crate::worker::WorkerGroup;

/// Everything the workers share with the queue handle.
pub(crate) struct QueueShared {
    pub(crate) registry: Mutex<TaskRegistry>,
    pub(crate) fifo: Arc<dyn DeliveryQueue>,
    pub(crate) clock: Arc<dyn Clock>,
}

/// TaskQueue は notification task を受け付け、worker pool で processor に流す
///
/// # 使用例
/// ```ignore
/// let queue = TaskQueue::new(2);
/// queue.set_processor(FnProcessor::new(|_ty, _payload| Ok(json!({"ok": true}))));
/// queue.start().await?;
/// let id = queue.enqueue("meteo", json!({"titre": "Orage"})).await;
/// queue.drain().await;
/// queue.stop(Duration::from_secs(5)).await;
/// ```
pub struct TaskQueue {
    shared: Arc<QueueShared>,
    ids: Arc<dyn IdGenerator>,
    processor: StdMutex<Option<Arc<dyn TaskProcessor>>>,
    workers: Mutex<Option<WorkerGroup>>,
    running: AtomicBool,
    settings: QueueSettings,
}

impl TaskQueue {
    pub fn new(num_workers: usize) -> Self {
        Self::with_settings(QueueSettings::with_workers(num_workers))
    }

    pub fn with_settings(settings: QueueSettings) -> Self {
        Self::builder().settings(settings).build()
    }

    pub fn builder() -> TaskQueueBuilder {
        TaskQueueBuilder::default()
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Install the processor. Takes effect at the next `start`.
    pub fn set_processor(&self, processor: impl TaskProcessor + 'static) {
        self.set_shared_processor(Arc::new(processor));
    }

    pub fn set_shared_processor(&self, processor: Arc<dyn TaskProcessor>) {
        if self.is_running() {
            warn!("processor replaced while running; workers keep the old one until restart");
        }
        *self.processor.lock().unwrap_or_else(|e| e.into_inner()) = Some(processor);
    }

    fn processor(&self) -> Option<Arc<dyn TaskProcessor>> {
        self.processor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Spawn the worker pool. No-op when already running.
    pub async fn start(&self) -> Result<(), BeaconError> {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            debug!("start ignored: already running");
            return Ok(());
        }

        self.settings.validate()?;
        let processor = self.processor().ok_or_else(|| {
            BeaconError::Configuration("no processor set; call set_processor before start".into())
        })?;

        let group = WorkerGroup::spawn(
            self.settings.num_workers,
            Arc::clone(&self.shared),
            processor,
            self.settings.poll_interval,
        );
        info!(workers = group.len(), "task queue started");
        *workers = Some(group);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop taking new tasks and join each worker with `timeout`. No-op when stopped.
    pub async fn stop(&self, timeout: Duration) {
        let mut workers = self.workers.lock().await;
        let Some(group) = workers.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        group.shutdown_and_join(timeout).await;
        info!("task queue stopped");
    }

    /// Register a PENDING task and hand its id to the workers.
    pub async fn enqueue(&self, task_type: impl Into<TaskType>, payload: Value) -> TaskId {
        let task_type = task_type.into();
        let now = self.shared.clock.now();
        let id = {
            let mut registry = self.shared.registry.lock().await;
            let mut id = self.ids.generate_task_id();
            while registry.contains(&id) {
                id = self.ids.generate_task_id();
            }
            registry.insert_pending(id, task_type.clone(), payload, now);
            id
        };
        self.shared.fifo.push(id);
        debug!(task_id = %id, task_type = %task_type, "task enqueued");
        id
    }

    pub async fn get_task(&self, id: &TaskId) -> Option<TaskRecord> {
        self.shared.registry.lock().await.get(id)
    }

    /// Most recently created first, at most `limit` entries.
    pub async fn get_all_tasks(&self, limit: usize) -> Vec<TaskSnapshot> {
        self.shared.registry.lock().await.recent(limit)
    }

    pub async fn get_stats(&self) -> QueueStats {
        let registry = self.shared.registry.lock().await;
        QueueStats {
            counters: registry.counters(),
            tasks_by_status: registry.counts_by_status(),
            total_tasks: registry.len(),
            workers: self.settings.num_workers,
            running: self.is_running(),
        }
    }

    /// Remove COMPLETED/FAILED tasks that finished strictly before `now - older_than`.
    pub async fn clear_completed(&self, older_than: chrono::Duration) -> usize {
        let Some(cutoff) = self.shared.clock.now().checked_sub_signed(older_than) else {
            return 0;
        };
        let removed = self.shared.registry.lock().await.sweep(cutoff);
        if removed > 0 {
            info!(removed, "cleared finished tasks");
        }
        removed
    }

    pub async fn clear_completed_hours(&self, hours: u32) -> usize {
        self.clear_completed(chrono::Duration::hours(i64::from(hours)))
            .await
    }

    /// Sweep with the configured retention.
    pub async fn clear_expired(&self) -> usize {
        match chrono::Duration::from_std(self.settings.retention) {
            Ok(retention) => self.clear_completed(retention).await,
            Err(_) => 0,
        }
    }

    /// Wait until every enqueued task has been settled by a worker.
    ///
    /// Never returns while tasks are pending and the queue is stopped.
    pub async fn drain(&self) {
        self.shared.fifo.join().await;
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::with_settings(QueueSettings::default())
    }
}

/// Wiring for a `TaskQueue`; unset parts fall back to the system clock,
/// ULID ids and the in-process FIFO.
#[derive(Default)]
pub struct TaskQueueBuilder {
    settings: QueueSettings,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    fifo: Option<Arc<dyn DeliveryQueue>>,
    processor: Option<Arc<dyn TaskProcessor>>,
}

impl TaskQueueBuilder {
    pub fn settings(mut self, settings: QueueSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn delivery_queue(mut self, fifo: Arc<dyn DeliveryQueue>) -> Self {
        self.fifo = Some(fifo);
        self
    }

    pub fn processor(mut self, processor: impl TaskProcessor + 'static) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    pub fn build(self) -> TaskQueue {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let fifo = self
            .fifo
            .unwrap_or_else(|| Arc::new(InMemoryDeliveryQueue::new()));

        TaskQueue {
            shared: Arc::new(QueueShared {
                registry: Mutex::new(TaskRegistry::new()),
                fifo,
                clock,
            }),
            ids,
            processor: StdMutex::new(self.processor),
            workers: Mutex::new(None),
            running: AtomicBool::new(false),
            settings: self.settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use crate::ports::{FixedClock, FnProcessor};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashSet;

    fn fast_settings(num_workers: usize) -> QueueSettings {
        QueueSettings {
            num_workers,
            poll_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(1),
            ..QueueSettings::default()
        }
    }

    fn ok_processor() -> impl TaskProcessor {
        FnProcessor::new(|_: &TaskType, _: &Value| Ok(json!({"ok": true})))
    }

    async fn wait_terminal(queue: &TaskQueue, id: &TaskId) -> TaskRecord {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = queue.get_task(id).await
                    && record.status.is_terminal()
                {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task should reach a terminal state")
    }

    #[tokio::test]
    async fn successful_task_is_completed_with_result() {
        let queue = TaskQueue::with_settings(fast_settings(2));
        queue.set_processor(ok_processor());
        queue.start().await.unwrap();

        let id = queue.enqueue("meteo", json!({"titre": "Orage"})).await;
        let record = wait_terminal(&queue, &id).await;

        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result, Some(json!({"ok": true})));
        assert!(record.error.is_none());
        assert!(record.started_at.is_some());
        assert!(record.completed_at >= record.started_at);
        queue.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn failing_task_is_failed_with_message() {
        let queue = TaskQueue::with_settings(fast_settings(1));
        queue.set_processor(FnProcessor::new(|_: &TaskType, _: &Value| {
            Err(BeaconError::processing("smtp relay refused"))
        }));
        queue.start().await.unwrap();

        let id = queue.enqueue("sante", json!({})).await;
        let record = wait_terminal(&queue, &id).await;
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.unwrap().contains("smtp relay refused"));
        assert!(record.result.is_none());

        let stats = queue.get_stats().await;
        assert_eq!(stats.tasks_by_status.failed, 1);
        assert_eq!(stats.counters.total_failed, 1);
        assert_eq!(stats.counters.current_queue_size, 0);
        queue.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drained_queue_accounts_for_every_task() {
        let queue = TaskQueue::with_settings(fast_settings(4));
        queue.set_processor(FnProcessor::new(|_: &TaskType, payload: &Value| {
            if payload["n"].as_u64().unwrap_or(0) % 3 == 0 {
                Err(BeaconError::processing("multiple of three"))
            } else {
                Ok(json!({}))
            }
        }));
        queue.start().await.unwrap();

        for n in 0..30 {
            queue.enqueue("infra", json!({"n": n})).await;
        }
        queue.drain().await;

        let stats = queue.get_stats().await;
        assert_eq!(stats.counters.total_enqueued, 30);
        assert_eq!(stats.counters.total_failed, 10);
        assert_eq!(stats.counters.total_processed, 20);
        assert_eq!(
            stats.tasks_by_status.completed + stats.tasks_by_status.failed,
            30
        );
        assert_eq!(stats.counters.current_queue_size, 0);
        assert_eq!(stats.total_tasks, 30);
        queue.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn single_worker_starts_tasks_in_fifo_order() {
        let queue = TaskQueue::with_settings(fast_settings(1));
        queue.set_processor(ok_processor());

        let a = queue.enqueue("meteo", json!({"i": 0})).await;
        let b = queue.enqueue("meteo", json!({"i": 1})).await;
        queue.start().await.unwrap();
        queue.drain().await;

        let a = queue.get_task(&a).await.unwrap();
        let b = queue.get_task(&b).await.unwrap();
        assert!(a.started_at.unwrap() <= b.started_at.unwrap());
        assert!(a.completed_at.unwrap() <= b.started_at.unwrap());
        queue.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueues_get_unique_ids() {
        let queue = Arc::new(TaskQueue::new(1));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    ids.push(queue.enqueue("securite", json!({})).await);
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 400);
        assert_eq!(unique.len(), 400);
        assert_eq!(queue.get_stats().await.counters.total_enqueued, 400);
    }

    #[tokio::test]
    async fn clear_completed_respects_age() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let queue = TaskQueue::builder()
            .settings(fast_settings(1))
            .clock(Arc::new(clock.clone()))
            .processor(ok_processor())
            .build();
        queue.start().await.unwrap();
        for _ in 0..3 {
            queue.enqueue("meteo", json!({})).await;
        }
        queue.drain().await;

        assert_eq!(queue.clear_completed_hours(999_999).await, 0);
        // completed_at == now is not strictly older than now - 0h
        assert_eq!(queue.clear_completed_hours(0).await, 0);

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(queue.clear_completed_hours(0).await, 3);
        assert_eq!(queue.get_stats().await.total_tasks, 0);
        queue.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn clear_completed_zero_hours_removes_every_terminal_task() {
        let queue = TaskQueue::with_settings(fast_settings(2));
        queue.set_processor(FnProcessor::new(|_: &TaskType, payload: &Value| {
            if payload["n"].as_u64() == Some(0) {
                Err(BeaconError::processing("bounced"))
            } else {
                Ok(json!({}))
            }
        }));
        queue.start().await.unwrap();
        for n in 0..5 {
            queue.enqueue("meteo", json!({"n": n})).await;
        }
        queue.drain().await;
        queue.stop(Duration::from_secs(1)).await;

        // real clock: completion stamps are already in the past
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.clear_completed_hours(0).await, 5);
        assert_eq!(queue.get_stats().await.total_tasks, 0);
    }

    #[tokio::test]
    async fn clear_completed_keeps_pending_tasks() {
        let queue = TaskQueue::new(1);
        queue.enqueue("meteo", json!({})).await;
        assert_eq!(queue.clear_completed_hours(0).await, 0);
        assert_eq!(queue.get_stats().await.tasks_by_status.pending, 1);
    }

    #[tokio::test]
    async fn start_without_processor_is_a_configuration_error() {
        let queue = TaskQueue::new(2);
        let err = queue.start().await.unwrap_err();
        assert!(matches!(err, BeaconError::Configuration(_)));
        assert!(!queue.is_running());
        assert!(!queue.get_stats().await.running);
    }

    #[tokio::test]
    async fn start_with_zero_workers_is_rejected() {
        let queue = TaskQueue::new(0);
        queue.set_processor(ok_processor());
        assert!(matches!(
            queue.start().await,
            Err(BeaconError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let queue = TaskQueue::with_settings(fast_settings(2));
        queue.set_processor(ok_processor());

        queue.stop(Duration::from_millis(100)).await;
        queue.start().await.unwrap();
        queue.start().await.unwrap();
        assert!(queue.get_stats().await.running);
        assert_eq!(queue.get_stats().await.workers, 2);

        queue.stop(Duration::from_secs(1)).await;
        queue.stop(Duration::from_secs(1)).await;
        assert!(!queue.is_running());

        // restartable
        queue.start().await.unwrap();
        let id = queue.enqueue("meteo", json!({})).await;
        assert_eq!(wait_terminal(&queue, &id).await.status, TaskStatus::Completed);
        queue.stop(Duration::from_secs(1)).await;
    }

    struct Panicking;

    #[async_trait]
    impl TaskProcessor for Panicking {
        async fn process(&self, task_type: &TaskType, _: &Value) -> Result<Value, BeaconError> {
            if task_type.as_str() == "boom" {
                panic!("template exploded");
            }
            Ok(json!("fine"))
        }
    }

    #[tokio::test]
    async fn panicking_processor_fails_the_task_not_the_worker() {
        let queue = TaskQueue::with_settings(fast_settings(1));
        queue.set_processor(Panicking);
        queue.start().await.unwrap();

        let bad = queue.enqueue("boom", json!({})).await;
        let good = queue.enqueue("meteo", json!({})).await;
        queue.drain().await;

        let bad = queue.get_task(&bad).await.unwrap();
        assert_eq!(bad.status, TaskStatus::Failed);
        assert!(bad.error.unwrap().contains("template exploded"));

        let good = queue.get_task(&good).await.unwrap();
        assert_eq!(good.status, TaskStatus::Completed);
        assert_eq!(good.result, Some(json!("fine")));
        queue.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn get_all_tasks_returns_newest_first() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let queue = TaskQueue::builder().clock(Arc::new(clock.clone())).build();

        let first = queue.enqueue("meteo", json!({})).await;
        clock.advance(chrono::Duration::seconds(1));
        let second = queue.enqueue("sante", json!({})).await;
        let third = queue.enqueue("infra", json!({})).await;

        let all = queue.get_all_tasks(10).await;
        let ids: Vec<&str> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                third.to_string().as_str(),
                second.to_string().as_str(),
                first.to_string().as_str()
            ]
        );
        assert_eq!(all[0].task_type, "infra");
        assert_eq!(queue.get_all_tasks(2).await.len(), 2);
    }

    #[tokio::test]
    async fn short_circuited_task_ends_failed() {
        use crate::resilience::{BreakerSettings, CircuitBreaker, CircuitBreakerLayer};

        let breaker = Arc::new(CircuitBreaker::new(BreakerSettings::new(
            1,
            Duration::from_secs(60),
        )));
        let failing = FnProcessor::new(|_: &TaskType, _: &Value| {
            Err(BeaconError::processing("sms gateway down"))
        });

        let queue = TaskQueue::with_settings(fast_settings(1));
        queue.set_processor(CircuitBreakerLayer::new(failing, breaker, "sms"));
        queue.start().await.unwrap();

        let a = queue.enqueue("meteo", json!({})).await;
        let b = queue.enqueue("meteo", json!({})).await;
        queue.drain().await;

        let a = queue.get_task(&a).await.unwrap();
        assert_eq!(a.status, TaskStatus::Failed);
        assert!(a.error.unwrap().contains("sms gateway down"));

        let b = queue.get_task(&b).await.unwrap();
        assert_eq!(b.status, TaskStatus::Failed);
        assert!(b.error.unwrap().contains("temporarily unavailable"));
        assert_eq!(queue.get_stats().await.counters.total_failed, 2);
        queue.stop(Duration::from_secs(1)).await;
    }

    struct Slow(Duration);

    #[async_trait]
    impl TaskProcessor for Slow {
        async fn process(&self, _: &TaskType, _: &Value) -> Result<Value, BeaconError> {
            tokio::time::sleep(self.0).await;
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn stop_detaches_stuck_workers() {
        let queue = TaskQueue::with_settings(fast_settings(1));
        queue.set_processor(Slow(Duration::from_millis(300)));
        queue.start().await.unwrap();
        let id = queue.enqueue("meteo", json!({})).await;

        // wait until the worker picked it up
        tokio::time::timeout(Duration::from_secs(2), async {
            while queue.get_task(&id).await.unwrap().status == TaskStatus::Pending {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let started = tokio::time::Instant::now();
        queue.stop(Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(!queue.is_running());
    }
}
