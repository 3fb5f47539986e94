//! TaskRegistry - TaskRecord の保管場所と lifetime counters
//!
//! `TaskQueue` が 1 つの Mutex で包んで使う。ここのメソッドは全て同期で、
//! ロックを握ったまま await することはない。
//! counters は、それを生んだ状態遷移と同じロック区間で更新する。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::domain::{QueueCounters, StatusCounts, TaskId, TaskRecord, TaskSnapshot, TaskType};

#[derive(Debug, Default)]
pub(crate) struct TaskRegistry {
    records: HashMap<TaskId, TaskRecord>,
    next_seq: u64,
    counters: QueueCounters,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, id: &TaskId) -> bool {
        self.records.contains_key(id)
    }

    /// Register a new PENDING task.
    pub(crate) fn insert_pending(
        &mut self,
        id: TaskId,
        task_type: TaskType,
        payload: Value,
        now: DateTime<Utc>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records
            .insert(id, TaskRecord::new(id, task_type, payload, seq, now));
        self.counters.total_enqueued += 1;
        self.counters.current_queue_size += 1;
    }

    /// PENDING -> PROCESSING. Returns what the processor needs, or `None`
    /// if the task is gone or was already claimed.
    pub(crate) fn claim(&mut self, id: TaskId, now: DateTime<Utc>) -> Option<(TaskType, Value)> {
        let record = self.records.get_mut(&id)?;
        if let Err(e) = record.start_processing(now) {
            warn!(task_id = %id, error = %e, "task cannot be claimed");
            return None;
        }
        Some((record.task_type.clone(), record.payload.clone()))
    }

    /// PROCESSING -> COMPLETED.
    pub(crate) fn complete(&mut self, id: TaskId, now: DateTime<Utc>, result: Value) {
        let Some(record) = self.records.get_mut(&id) else {
            warn!(task_id = %id, "completed task vanished from registry");
            return;
        };
        match record.mark_completed(now, result) {
            Ok(()) => {
                self.counters.total_processed += 1;
                self.counters.current_queue_size = self.counters.current_queue_size.saturating_sub(1);
            }
            Err(e) => warn!(task_id = %id, error = %e, "dropping completion"),
        }
    }

    /// PROCESSING -> FAILED.
    pub(crate) fn fail(&mut self, id: TaskId, now: DateTime<Utc>, error: String) {
        let Some(record) = self.records.get_mut(&id) else {
            warn!(task_id = %id, "failed task vanished from registry");
            return;
        };
        match record.mark_failed(now, error) {
            Ok(()) => {
                self.counters.total_failed += 1;
                self.counters.current_queue_size = self.counters.current_queue_size.saturating_sub(1);
            }
            Err(e) => warn!(task_id = %id, error = %e, "dropping failure"),
        }
    }

    pub(crate) fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        self.records.get(id).cloned()
    }

    /// Most recently created first; equal timestamps fall back to enqueue order.
    pub(crate) fn recent(&self, limit: usize) -> Vec<TaskSnapshot> {
        let mut records: Vec<&TaskRecord> = self.records.values().collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        records
            .into_iter()
            .take(limit)
            .map(TaskRecord::snapshot)
            .collect()
    }

    pub(crate) fn counters(&self) -> QueueCounters {
        self.counters
    }

    pub(crate) fn counts_by_status(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.records.values() {
            counts.add(record.status);
        }
        counts
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Remove terminal tasks that finished strictly before `cutoff`.
    pub(crate) fn sweep(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired(cutoff));
        before - self.records.len()
    }

    #[cfg(test)]
    pub(crate) fn status_of(&self, id: &TaskId) -> Option<crate::domain::TaskStatus> {
        self.records.get(id).map(|r| r.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn enqueue(reg: &mut TaskRegistry, now: DateTime<Utc>) -> TaskId {
        let id = TaskId::from_ulid(Ulid::new());
        reg.insert_pending(id, TaskType::new("meteo"), json!({}), now);
        id
    }

    #[test]
    fn counters_follow_transitions() {
        let mut reg = TaskRegistry::new();
        let a = enqueue(&mut reg, t0());
        let b = enqueue(&mut reg, t0());
        assert_eq!(reg.counters().current_queue_size, 2);

        reg.claim(a, t0()).unwrap();
        reg.complete(a, t0(), json!({"ok": true}));
        reg.claim(b, t0()).unwrap();
        reg.fail(b, t0(), "boom".into());

        let c = reg.counters();
        assert_eq!(c.total_enqueued, 2);
        assert_eq!(c.total_processed, 1);
        assert_eq!(c.total_failed, 1);
        assert_eq!(c.current_queue_size, 0);
        assert_eq!(reg.counts_by_status().completed, 1);
        assert_eq!(reg.counts_by_status().failed, 1);
    }

    #[test]
    fn claim_is_exclusive() {
        let mut reg = TaskRegistry::new();
        let a = enqueue(&mut reg, t0());
        assert!(reg.claim(a, t0()).is_some());
        assert!(reg.claim(a, t0()).is_none());
        assert!(reg.claim(TaskId::from_ulid(Ulid::new()), t0()).is_none());
        assert_eq!(reg.status_of(&a), Some(TaskStatus::Processing));
    }

    #[test]
    fn completing_twice_does_not_double_count() {
        let mut reg = TaskRegistry::new();
        let a = enqueue(&mut reg, t0());
        reg.claim(a, t0()).unwrap();
        reg.complete(a, t0(), json!(1));
        reg.fail(a, t0(), "late".into());

        let c = reg.counters();
        assert_eq!(c.total_processed, 1);
        assert_eq!(c.total_failed, 0);
        assert_eq!(reg.get(&a).unwrap().result, Some(json!(1)));
    }

    #[test]
    fn recent_orders_by_creation_then_sequence() {
        let mut reg = TaskRegistry::new();
        let old = enqueue(&mut reg, t0());
        let tie1 = enqueue(&mut reg, t0() + Duration::seconds(1));
        let tie2 = enqueue(&mut reg, t0() + Duration::seconds(1));

        let ids: Vec<String> = reg.recent(10).into_iter().map(|s| s.id).collect();
        assert_eq!(
            ids,
            vec![tie2.to_string(), tie1.to_string(), old.to_string()]
        );
        assert_eq!(reg.recent(1).len(), 1);
        assert!(reg.recent(0).is_empty());
    }

    #[test]
    fn sweep_only_removes_old_terminal_tasks() {
        let mut reg = TaskRegistry::new();
        let done = enqueue(&mut reg, t0());
        let pending = enqueue(&mut reg, t0());
        reg.claim(done, t0()).unwrap();
        reg.complete(done, t0(), json!(null));

        assert_eq!(reg.sweep(t0()), 0);
        assert_eq!(reg.sweep(t0() + Duration::seconds(1)), 1);
        assert!(reg.get(&done).is_none());
        assert!(reg.get(&pending).is_some());
        assert_eq!(reg.len(), 1);
    }
}
