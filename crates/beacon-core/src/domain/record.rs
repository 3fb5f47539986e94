//! Task record: the single source of truth for one queued task.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskStatus, TaskType};
use crate::error::BeaconError;

/// Metadata + payload for a task in the queue.
///
/// Design:
/// - The FIFO holds TaskId only; everything else lives here.
/// - All state transitions happen here, so the invariants
///   (timestamps set once, `error` iff Failed, `result` iff Completed)
///   are enforced in one place.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub status: TaskStatus,

    /// Enqueue order within the owning queue. Breaks ties between equal `created_at`.
    pub seq: u64,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        payload: serde_json::Value,
        seq: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            payload,
            status: TaskStatus::Pending,
            seq,
            created_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), BeaconError> {
        if !self.status.can_transition_to(to) {
            return Err(BeaconError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending -> Processing.
    pub fn start_processing(&mut self, now: DateTime<Utc>) -> Result<(), BeaconError> {
        self.transition(TaskStatus::Processing)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Processing -> Completed.
    pub fn mark_completed(
        &mut self,
        now: DateTime<Utc>,
        result: serde_json::Value,
    ) -> Result<(), BeaconError> {
        self.transition(TaskStatus::Completed)?;
        self.completed_at = Some(now);
        self.result = Some(result);
        Ok(())
    }

    /// Processing -> Failed.
    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: String) -> Result<(), BeaconError> {
        self.transition(TaskStatus::Failed)?;
        self.completed_at = Some(now);
        self.error = Some(error);
        Ok(())
    }

    /// Terminal and finished strictly before `cutoff`?
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.is_terminal() && self.completed_at.is_some_and(|t| t < cutoff)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot::from(self)
    }
}

/// Serializable view of a task for status surfaces (HTTP, CLI).
///
/// Timestamps are exposed twice: raw epoch seconds and ISO-8601.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub data: serde_json::Value,
    pub status: TaskStatus,
    pub created_at: f64,
    pub created_at_iso: String,
    pub started_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_iso: Option<String>,
    pub completed_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_iso: Option<String>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

fn epoch_secs(t: DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl From<&TaskRecord> for TaskSnapshot {
    fn from(r: &TaskRecord) -> Self {
        Self {
            id: r.id.to_string(),
            task_type: r.task_type.to_string(),
            data: r.payload.clone(),
            status: r.status,
            created_at: epoch_secs(r.created_at),
            created_at_iso: iso(r.created_at),
            started_at: r.started_at.map(epoch_secs),
            started_at_iso: r.started_at.map(iso),
            completed_at: r.completed_at.map(epoch_secs),
            completed_at_iso: r.completed_at.map(iso),
            error: r.error.clone(),
            result: r.result.clone(),
        }
    }
}
