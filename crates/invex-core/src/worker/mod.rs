//! Worker pool executing queued tasks.

mod pool;

pub use pool::WorkerPool;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::InvexError;
use crate::models::record::InvoiceRecord;
use crate::models::task::{ProcessingTask, TaskId, TaskState};

/// Terminal outcome of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    /// Permanent failure.
    Failed,
    /// Retry budget exhausted.
    Dead,
}

impl TaskOutcome {
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Succeeded => TaskState::Succeeded,
            TaskOutcome::Failed => TaskState::Failed,
            TaskOutcome::Dead => TaskState::Dead,
        }
    }
}

/// Final report of a task, emitted exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    /// The task in its terminal state.
    pub task: ProcessingTask,
    pub outcome: TaskOutcome,
    /// The assembled record, when the pipeline got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<InvoiceRecord>,
    /// Why the task did not succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TaskReport {
    pub fn task_id(&self) -> &str {
        &self.task.id
    }
}

/// Handle returned on submission.
#[derive(Debug)]
pub struct TaskTicket {
    pub id: TaskId,
    outcome: oneshot::Receiver<TaskReport>,
}

impl TaskTicket {
    /// Wait for the task's final report.
    pub async fn wait(self) -> Result<TaskReport, InvexError> {
        self.outcome.await.map_err(|_| InvexError::PoolClosed)
    }
}

/// Pool counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dead: u64,
    /// Retries scheduled after transient failures.
    pub retries: u64,
    pub in_flight: u64,
}

impl PoolStats {
    /// Tasks that reached a terminal state.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.dead
    }
}
