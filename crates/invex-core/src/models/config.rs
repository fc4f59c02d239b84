//! Configuration structures for the extraction pipeline.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::schema::{DetectionClass, Device, Language};

/// Main configuration for the invex pipeline.
///
/// Loaded once at startup and shared read-only (behind an `Arc`) by the
/// queue, worker pool, normalizer and confidence gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvexConfig {
    /// Region detection configuration.
    pub detection: DetectionConfig,

    /// Text recognition configuration.
    pub recognition: RecognitionConfig,

    /// Queue and worker pool configuration.
    pub workers: WorkerConfig,

    /// Post-processing (normalization) toggles.
    pub postprocess: PostprocessConfig,

    /// Quality monitoring configuration.
    pub quality: QualityConfig,
}

/// Region detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum confidence for a field to be accepted (0.0 - 1.0).
    pub confidence_threshold: f32,

    /// Detection classes, in output order.
    pub classes: Vec<DetectionClass>,

    /// Device the detector and recognizer run on.
    pub device: Device,

    /// Serialize capability calls on the device. Defaults to true for accelerators.
    pub exclusive_device: Option<bool>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            classes: vec![
                DetectionClass::InvoiceNumber,
                DetectionClass::Date,
                DetectionClass::TotalAmount,
                DetectionClass::SupplierName,
                DetectionClass::Inn,
                DetectionClass::ItemsTable,
                DetectionClass::Address,
                DetectionClass::PaymentInfo,
            ],
            device: Device::Cpu,
            exclusive_device: None,
        }
    }
}

impl DetectionConfig {
    /// Whether capability calls must hold the device lease.
    pub fn exclusive_device(&self) -> bool {
        self.exclusive_device
            .unwrap_or_else(|| self.device.is_accelerator())
    }
}

/// Text recognition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Recognized languages, in preference order.
    pub languages: Vec<Language>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            languages: vec![Language::Ru, Language::En],
        }
    }
}

/// Queue and worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    pub count: usize,

    /// Wall-clock limit for one pipeline execution, in seconds.
    pub task_timeout_secs: u64,

    /// Maximum retries after transient failures.
    pub max_retries: u32,

    /// Delay before a failed task becomes visible again, in seconds.
    pub retry_delay_secs: u64,

    /// Number of priority levels (priorities are `0..priority_levels`).
    pub priority_levels: u8,

    /// Maximum pending tasks (0 = unbounded).
    pub queue_capacity: usize,

    /// Serve a bypassed lower-priority task after this many consecutive
    /// higher-priority dequeues. `None` keeps strict priority order.
    pub starvation_guard: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            task_timeout_secs: 300,
            max_retries: 3,
            retry_delay_secs: 60,
            priority_levels: 3,
            queue_capacity: 0,
            starvation_guard: None,
        }
    }
}

impl WorkerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Default priority for submissions without an explicit level.
    pub fn normal_priority(&self) -> u8 {
        self.priority_levels / 2
    }
}

/// Post-processing toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessConfig {
    /// Collapse whitespace runs and trim.
    pub whitespace: bool,

    /// Parse dates into a canonical calendar date.
    pub date: bool,

    /// Parse amounts into decimals.
    pub amount: bool,

    /// Reduce tax ids to their digits and check the length.
    pub tax_id: bool,

    /// Parse the items table into line items.
    pub items_table: bool,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            whitespace: true,
            date: true,
            amount: true,
            tax_id: true,
            items_table: true,
        }
    }
}

/// Quality monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum rolling precision before alerting.
    pub min_precision: f64,

    /// Minimum rolling recall before alerting.
    pub min_recall: f64,

    /// Minimum rolling F1 before alerting.
    pub min_f1: f64,

    /// Number of samples in the rolling window.
    pub window_size: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_precision: 0.9,
            min_recall: 0.9,
            min_f1: 0.9,
            window_size: 100,
        }
    }
}

impl InvexConfig {
    /// Load and validate configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid("detection.confidence_threshold", format!("{threshold} is outside [0, 1]")));
        }

        if self.detection.classes.is_empty() {
            return Err(invalid("detection.classes", "at least one class is required"));
        }
        let mut seen = HashSet::new();
        for class in &self.detection.classes {
            if !seen.insert(class) {
                return Err(invalid("detection.classes", format!("duplicate class {class}")));
            }
        }

        if self.recognition.languages.is_empty() {
            return Err(invalid("recognition.languages", "at least one language is required"));
        }
        let mut seen = HashSet::new();
        for language in &self.recognition.languages {
            if !seen.insert(language) {
                return Err(invalid("recognition.languages", format!("duplicate language {}", language.code())));
            }
        }

        if self.workers.count == 0 {
            return Err(invalid("workers.count", "must be at least 1"));
        }
        if self.workers.priority_levels == 0 {
            return Err(invalid("workers.priority_levels", "must be at least 1"));
        }
        if self.workers.task_timeout_secs == 0 {
            return Err(invalid("workers.task_timeout_secs", "must be at least 1"));
        }
        if self.workers.starvation_guard == Some(0) {
            return Err(invalid("workers.starvation_guard", "must be at least 1 when set"));
        }

        for (key, value) in [
            ("quality.min_precision", self.quality.min_precision),
            ("quality.min_recall", self.quality.min_recall),
            ("quality.min_f1", self.quality.min_f1),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(key, format!("{value} is outside [0, 1]")));
            }
        }
        if self.quality.window_size == 0 {
            return Err(invalid("quality.window_size", "must be at least 1"));
        }

        Ok(())
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}
