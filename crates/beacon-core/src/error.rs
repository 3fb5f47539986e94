use std::time::Duration;

use thiserror::Error;

use crate::domain::{TaskStatus, TaskType};

#[derive(Debug, Error)]
pub enum BeaconError {
    /// The queue or a component was wired incorrectly (e.g. started without a processor).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A processor failed while handling a task.
    #[error("{0}")]
    Processing(String),

    /// The circuit for `key` is open; the operation was not invoked.
    #[error("circuit open for {key}: temporarily unavailable (retry in {:.1}s)", .retry_in.as_secs_f64())]
    CircuitOpen { key: String, retry_in: Duration },

    #[error("handler not found for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),

    #[error("invalid task transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("payload decode: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl BeaconError {
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing(message.into())
    }

    /// Was this error produced by an open circuit rather than by the operation itself?
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}
