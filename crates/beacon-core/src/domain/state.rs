//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a queued task.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Failed
///
/// Completed and Failed are terminal. There is no retry edge here: retries
/// happen inside the processor, never in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Enqueued, waiting for a worker.
    Pending,

    /// Claimed by exactly one worker.
    Processing,

    /// Processor returned a result.
    Completed,

    /// Processor returned an error (or panicked).
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Is `self -> next` an edge of the state machine?
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::claim(TaskStatus::Pending, TaskStatus::Processing, true)]
    #[case::complete(TaskStatus::Processing, TaskStatus::Completed, true)]
    #[case::fail(TaskStatus::Processing, TaskStatus::Failed, true)]
    #[case::skip_processing(TaskStatus::Pending, TaskStatus::Completed, false)]
    #[case::reclaim(TaskStatus::Processing, TaskStatus::Processing, false)]
    #[case::revive_completed(TaskStatus::Completed, TaskStatus::Pending, false)]
    #[case::flip_terminal(TaskStatus::Failed, TaskStatus::Completed, false)]
    fn transitions(#[case] from: TaskStatus, #[case] to: TaskStatus, #[case] legal: bool) {
        assert_eq!(from.can_transition_to(to), legal);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn serializes_lowercase() {
        let s = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(s, "\"processing\"");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
    }
}
