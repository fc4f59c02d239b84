//! Processing task model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::schema::DetectionClass;

/// Unique task identifier.
pub type TaskId = String;

/// Expected field values for evaluation-mode tasks.
pub type GroundTruth = BTreeMap<DetectionClass, String>;

/// Opaque handle to the document a task processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(String);

impl SourceRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret the reference as a filesystem path.
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Path> for SourceRef {
    fn from(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Pending,
    InProgress,
    Succeeded,
    /// Permanent failure, never retried.
    Failed,
    /// Transient failures exhausted the retry budget.
    Dead,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::Dead)
    }
}

/// One document to process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: TaskId,
    pub source: SourceRef,
    pub priority: u8,
    /// Retries scheduled so far; never exceeds `max_retries`.
    pub retry_count: u32,
    pub max_retries: u32,
    /// Pipeline executions started.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<GroundTruth>,
}

impl ProcessingTask {
    /// Create a pending task with a fresh id.
    pub fn new(source: SourceRef, priority: u8, max_retries: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            priority,
            retry_count: 0,
            max_retries,
            attempts: 0,
            created_at: Utc::now(),
            state: TaskState::Pending,
            last_error: None,
            ground_truth: None,
        }
    }

    /// Attach ground truth, putting the task in evaluation mode.
    pub fn with_ground_truth(mut self, ground_truth: GroundTruth) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    /// Whether another transient failure may be retried.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Record a transient failure and schedule a retry.
    ///
    /// Returns `false` (leaving the task untouched apart from the error) when
    /// the retry budget is exhausted.
    pub fn schedule_retry(&mut self, reason: impl Into<String>) -> bool {
        self.last_error = Some(reason.into());
        if !self.can_retry() {
            return false;
        }
        self.retry_count += 1;
        self.state = TaskState::Pending;
        true
    }

    /// Resolve the task into a terminal state.
    pub fn resolve(&mut self, state: TaskState, reason: Option<String>) {
        debug_assert!(state.is_terminal());
        self.state = state;
        if reason.is_some() {
            self.last_error = reason;
        }
    }
}
