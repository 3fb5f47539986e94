use serde::{Deserialize, Serialize};

use super::TaskStatus;

/// Per-status task counts (over records currently retained).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Processing => self.processing += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Lifetime counters, updated under the registry lock together with the
/// transition that produced them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounters {
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    /// Enqueued and not yet terminal.
    pub current_queue_size: u64,
}

/// Aggregate view returned by `TaskQueue::get_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    #[serde(flatten)]
    pub counters: QueueCounters,
    pub tasks_by_status: StatusCounts,
    pub total_tasks: usize,
    pub workers: usize,
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_serialize_flat_counters() {
        let mut by_status = StatusCounts::default();
        by_status.add(TaskStatus::Failed);
        let stats = QueueStats {
            counters: QueueCounters {
                total_enqueued: 1,
                total_processed: 0,
                total_failed: 1,
                current_queue_size: 0,
            },
            tasks_by_status: by_status,
            total_tasks: 1,
            workers: 2,
            running: true,
        };

        let v = serde_json::to_value(&stats).unwrap();
        assert_eq!(v["total_enqueued"], 1);
        assert_eq!(v["total_failed"], 1);
        assert_eq!(v["tasks_by_status"]["failed"], 1);
        assert_eq!(v["workers"], 2);
        assert_eq!(v["running"], true);
    }
}
