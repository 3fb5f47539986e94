use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::TaskId;
use crate::ports::TaskProcessor;
use crate::queue::QueueShared;

/// Worker group handle.
/// - `request_shutdown()` でワーカー全体に停止を通知する
/// - `shutdown_and_join()` で各ワーカーの終了を（timeout 付きで）待てる
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub(crate) fn spawn(
        n: usize,
        shared: Arc<QueueShared>,
        processor: Arc<dyn TaskProcessor>,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let shared = Arc::clone(&shared);
            let processor = Arc::clone(&processor);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, shared, processor, poll_interval, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub(crate) fn len(&self) -> usize {
        self.joins.len()
    }

    /// Request shutdown for all workers.
    /// 実行中の processor は止めない。新しい task を取らなくなるだけ。
    pub(crate) fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for each worker up to `timeout`.
    /// 間に合わなかったワーカーは detach する（その task は PROCESSING のまま残りうる）。
    pub(crate) async fn shutdown_and_join(self, timeout: Duration) {
        self.request_shutdown();
        for (worker_id, mut join) in self.joins.into_iter().enumerate() {
            match tokio::time::timeout(timeout, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(worker_id, error = %e, "worker terminated abnormally"),
                Err(_) => warn!(
                    worker_id,
                    timeout_ms = saturating_millis(timeout),
                    "worker did not stop in time, detaching"
                ),
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<QueueShared>,
    processor: Arc<dyn TaskProcessor>,
    poll_interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        // shutdown が来ていたら抜ける
        if *shutdown_rx.borrow() {
            break;
        }

        // pop は最大 poll_interval 待つので、shutdown と競合させる
        let next = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // sender が drop された = queue ごと破棄された
                    break;
                }
                continue;
            }
            next = shared.fifo.pop(poll_interval) => next,
        };

        let Some(task_id) = next else {
            continue;
        };

        run_task(worker_id, &shared, &processor, task_id).await;
        shared.fifo.ack();
    }
    debug!(worker_id, "worker stopped");
}

/// Claim, process and settle one task. Never fails: every outcome lands in the registry.
async fn run_task(
    worker_id: usize,
    shared: &QueueShared,
    processor: &Arc<dyn TaskProcessor>,
    task_id: TaskId,
) {
    let claimed = {
        let now = shared.clock.now();
        let mut registry = shared.registry.lock().await;
        registry.claim(task_id, now)
    };
    let Some((task_type, payload)) = claimed else {
        debug!(worker_id, task_id = %task_id, "skipping task that is not pending");
        return;
    };
    debug!(worker_id, task_id = %task_id, task_type = %task_type, "processing task");

    // processor はロックの外で、別 task として実行する（panic を JoinError として受け取る）
    let outcome = {
        let processor = Arc::clone(processor);
        let task_type = task_type.clone();
        tokio::spawn(async move { processor.process(&task_type, &payload).await }).await
    };

    let now = shared.clock.now();
    let mut registry = shared.registry.lock().await;
    match outcome {
        Ok(Ok(result)) => {
            registry.complete(task_id, now, result);
            debug!(worker_id, task_id = %task_id, task_type = %task_type, "task completed");
        }
        Ok(Err(err)) => {
            let message = err.to_string();
            warn!(worker_id, task_id = %task_id, task_type = %task_type, error = %message, "task failed");
            registry.fail(task_id, now, message);
        }
        Err(join_err) => {
            let message = if join_err.is_panic() {
                format!("processor panicked: {}", panic_message(join_err.into_panic()))
            } else {
                format!("processor aborted: {join_err}")
            };
            error!(worker_id, task_id = %task_id, task_type = %task_type, error = %message, "task failed");
            registry.fail(task_id, now, message);
        }
    }
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
