//! Core library for queue-driven invoice field extraction.
//!
//! This crate provides:
//! - A priority task queue with delayed (backoff) re-entry and snapshots
//! - A worker pool driving detection, recognition, normalization and validation
//! - Deterministic field normalizers (dates, amounts, tax ids, line items)
//! - A confidence gate that assembles structured invoice records
//! - A rolling quality monitor with precision/recall/F1 alerts

pub mod error;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod pipeline;
pub mod quality;
pub mod queue;
pub mod source;
pub mod worker;

pub use error::{ConfigError, InvexError, LoadError, NormalizationError, OcrError, PipelineError, QueueError, Result};
pub use models::config::InvexConfig;
pub use models::record::{ExtractedField, FieldValue, InvoiceRecord, LineItem, RecordStatus, RejectReason};
pub use models::schema::{DetectionClass, Device, Language};
pub use models::task::{GroundTruth, ProcessingTask, SourceRef, TaskId, TaskState};
pub use normalize::Normalizer;
pub use ocr::{ComputeDevice, Detection, Region, RegionCrop, RegionDetector, TextRecognizer};
pub use pipeline::{ConfidenceGate, Pipeline, PipelineOutput};
pub use quality::{QualityAlert, QualityMonitor, QualitySample, QualitySnapshot};
pub use queue::{QueueDepth, QueueSnapshot, TaskQueue};
pub use source::{DocumentLoader, FileLoader};
pub use worker::{PoolStats, TaskOutcome, TaskReport, TaskTicket, WorkerPool};
