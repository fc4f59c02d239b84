//! Error types for the invex-core library.

use thiserror::Error;

/// Main error type for the invex library.
#[derive(Error, Debug)]
pub enum InvexError {
    /// Task queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Task-scoped pipeline error.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The worker pool is shut down and no longer accepts tasks.
    #[error("worker pool is shut down")]
    PoolClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors reported by the task queue to submitters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue holds `capacity` tasks and rejects new work.
    #[error("queue saturated ({capacity} pending tasks)")]
    Saturated { capacity: usize },

    /// The priority is not one of the configured levels.
    #[error("priority {priority} is outside the configured levels 0..{levels}")]
    InvalidPriority { priority: u8, levels: u8 },
}

/// Errors from the external detection/recognition capabilities.
#[derive(Error, Debug, Clone)]
pub enum OcrError {
    /// Region detection failed.
    #[error("region detection failed: {0}")]
    Detection(String),

    /// Text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// Invalid image format or dimensions.
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Errors raised while resolving a source reference into a page image.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The source does not exist.
    #[error("source not found: {0}")]
    NotFound(String),

    /// The source format is not supported.
    #[error("unsupported input: {0}")]
    Unsupported(String),

    /// The source exists but cannot be decoded.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Reading the source failed.
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// Whether retrying the same source can never succeed.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, LoadError::Io(_))
    }
}

/// Task-scoped pipeline failures.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The region detector returned an error.
    #[error("detection failure: {0}")]
    Detection(OcrError),

    /// The region detector returned no detections.
    #[error("detection failure: no regions detected")]
    NoDetections,

    /// Every region failed text recognition.
    #[error("recognition failure: all {regions} regions failed")]
    Recognition { regions: usize },

    /// No field passed the confidence gate.
    #[error("validation gap: no field was accepted")]
    ValidationGap,

    /// Execution exceeded the per-task timeout.
    #[error("task timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Execution was abandoned before completion.
    #[error("execution cancelled")]
    Cancelled,

    /// Execution panicked.
    #[error("execution panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    /// Whether this failure should be retried with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Load(e) => !e.is_permanent(),
            PipelineError::Detection(_)
            | PipelineError::NoDetections
            | PipelineError::Recognition { .. }
            | PipelineError::Timeout { .. }
            | PipelineError::Cancelled => true,
            PipelineError::ValidationGap | PipelineError::Panicked(_) => false,
        }
    }
}

/// Field-scoped normalization failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    /// No configured date pattern matched.
    #[error("no date pattern matched {0:?}")]
    NoDatePattern(String),

    /// The separators of an amount admit more than one reading.
    #[error("ambiguous amount {0:?}")]
    AmbiguousAmount(String),

    /// The text is not a number.
    #[error("not a numeric amount: {0:?}")]
    NotNumeric(String),

    /// The tax id does not have 10 or 12 digits.
    #[error("invalid tax id {0:?}")]
    InvalidTaxId(String),

    /// No line item row could be parsed.
    #[error("no line items found")]
    NoLineItems,

    /// Nothing left after whitespace normalization.
    #[error("empty text")]
    Empty,
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read configuration: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse the configuration (includes unknown classes/languages).
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range or inconsistent.
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Result type for the invex library.
pub type Result<T> = std::result::Result<T, InvexError>;
