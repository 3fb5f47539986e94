//! Domain model (IDs, task types, status, records, stats).
//!
//! Architecture-agnostic: nothing here knows about workers, FIFOs or locks.

pub mod ids;
pub mod record;
pub mod state;
pub mod stats;
pub mod task;

pub use ids::TaskId;
pub use record::{TaskRecord, TaskSnapshot};
pub use state::TaskStatus;
pub use stats::{QueueCounters, QueueStats, StatusCounts};
pub use task::TaskType;
