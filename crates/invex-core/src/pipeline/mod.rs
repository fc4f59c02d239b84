//! Per-task stage sequence: load, detect, recognize, normalize, validate and
//! score against ground truth.
//!
//! [`Pipeline::run`] is synchronous; the worker pool runs it on the blocking
//! thread pool. Cancellation is cooperative: the flag is checked between
//! stages and between regions.

mod validate;

pub use validate::ConfidenceGate;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::models::config::InvexConfig;
use crate::models::record::{ExtractedField, InvoiceRecord, RecordStatus, RejectReason};
use crate::models::schema::{DetectionClass, Language};
use crate::models::task::ProcessingTask;
use crate::normalize::Normalizer;
use crate::ocr::{ComputeDevice, Detection, RegionCrop, RegionDetector, TextRecognizer};
use crate::quality::{FieldMatcher, NormalizedMatcher, QualitySample};
use crate::source::{DocumentLoader, FileLoader};

/// Confidence multiplier applied when normalization fails.
pub const NORMALIZATION_PENALTY: f32 = 0.5;

/// Result of one pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub record: InvoiceRecord,
    /// Present when the task carried ground truth.
    pub sample: Option<QualitySample>,
}

impl PipelineOutput {
    /// The permanent failure a record without accepted fields represents.
    pub fn validation_gap(&self) -> Option<PipelineError> {
        (self.record.status == RecordStatus::Failed).then_some(PipelineError::ValidationGap)
    }
}

/// The extraction pipeline shared by all workers.
pub struct Pipeline {
    loader: Arc<dyn DocumentLoader>,
    detector: Arc<dyn RegionDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    device: Arc<ComputeDevice>,
    normalizer: Normalizer,
    gate: ConfidenceGate,
    matcher: Arc<dyn FieldMatcher>,
    languages: Vec<Language>,
}

impl Pipeline {
    /// Create a pipeline loading sources from the filesystem.
    pub fn new(config: &InvexConfig, detector: Arc<dyn RegionDetector>, recognizer: Arc<dyn TextRecognizer>) -> Self {
        let normalizer = Normalizer::from_config(config);
        Self {
            loader: Arc::new(FileLoader::new()),
            detector,
            recognizer,
            device: Arc::new(ComputeDevice::from_config(&config.detection)),
            matcher: Arc::new(NormalizedMatcher::new(normalizer.clone())),
            normalizer,
            gate: ConfidenceGate::from_config(&config.detection),
            languages: config.recognition.languages.clone(),
        }
    }

    /// Set the document loader.
    pub fn with_loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Set the compute device handle.
    pub fn with_device(mut self, device: Arc<ComputeDevice>) -> Self {
        self.device = device;
        self
    }

    /// Set the ground-truth comparison.
    pub fn with_matcher(mut self, matcher: Arc<dyn FieldMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn device(&self) -> &ComputeDevice {
        &self.device
    }

    /// Run every stage for one task.
    pub fn run(&self, task: &ProcessingTask, cancel: &AtomicBool) -> Result<PipelineOutput, PipelineError> {
        checkpoint(cancel)?;
        let page = self.loader.load(&task.source)?;
        debug!(task_id = %task.id, width = page.width(), height = page.height(), "source loaded");

        checkpoint(cancel)?;
        let detections = self.detect(task, &page)?;

        let candidates = self.recognize(task, &page, detections, cancel)?;

        checkpoint(cancel)?;
        let record = self.gate.assemble(&task.id, candidates);
        debug!(
            task_id = %task.id,
            status = ?record.status,
            accepted = record.accepted_count(),
            missing = record.missing.len(),
            "record assembled"
        );

        let sample = task
            .ground_truth
            .as_ref()
            .map(|truth| QualitySample::evaluate(&record, truth, self.matcher.as_ref()));

        Ok(PipelineOutput { record, sample })
    }

    /// Detect regions and keep the most confident detection per configured class.
    fn detect(&self, task: &ProcessingTask, page: &DynamicImage) -> Result<Vec<Detection>, PipelineError> {
        let lease = self.device.acquire();
        let detections = self.detector.detect(page).map_err(PipelineError::Detection)?;
        lease.release();

        if detections.is_empty() {
            return Err(PipelineError::NoDetections);
        }
        debug!(task_id = %task.id, count = detections.len(), "regions detected");

        let mut best: BTreeMap<DetectionClass, Detection> = BTreeMap::new();
        for detection in detections {
            if !self.gate.is_configured(detection.class) {
                debug!(task_id = %task.id, class = %detection.class, "ignoring unconfigured class");
                continue;
            }
            match best.get(&detection.class) {
                Some(current) if current.confidence >= detection.confidence => {}
                _ => {
                    best.insert(detection.class, detection);
                }
            }
        }

        Ok(self
            .gate
            .classes()
            .iter()
            .filter_map(|class| best.remove(class))
            .collect())
    }

    /// Recognize and normalize each selected region.
    fn recognize(
        &self,
        task: &ProcessingTask,
        page: &DynamicImage,
        detections: Vec<Detection>,
        cancel: &AtomicBool,
    ) -> Result<Vec<ExtractedField>, PipelineError> {
        let regions = detections.len();
        let mut failures = 0;
        let mut fields = Vec::with_capacity(regions);

        for detection in detections {
            checkpoint(cancel)?;

            let text = RegionCrop::from_page(page, detection.region).and_then(|crop| {
                let lease = self.device.acquire();
                let text = self.recognizer.recognize(&crop, &self.languages);
                lease.release();
                text
            });

            let field = match text {
                Ok(text) => self.normalize(task, &detection, text),
                Err(e) => {
                    failures += 1;
                    warn!(task_id = %task.id, class = %detection.class, error = %e, "region not recognized");
                    ExtractedField {
                        confidence: detection.confidence,
                        rejection: Some(RejectReason::Unrecognized),
                        note: Some(e.to_string()),
                        region: Some(detection.region),
                        ..ExtractedField::not_detected(detection.class)
                    }
                }
            };
            fields.push(field);
        }

        if regions > 0 && failures == regions {
            return Err(PipelineError::Recognition { regions });
        }
        Ok(fields)
    }

    fn normalize(&self, task: &ProcessingTask, detection: &Detection, text: String) -> ExtractedField {
        let mut field = ExtractedField {
            confidence: detection.confidence,
            region: Some(detection.region),
            rejection: None,
            ..ExtractedField::not_detected(detection.class)
        };

        match self.normalizer.normalize(detection.class, &text) {
            Ok(value) => field.value = Some(value),
            Err(e) => {
                debug!(task_id = %task.id, class = %detection.class, error = %e, "normalization failed");
                field.confidence = (detection.confidence * NORMALIZATION_PENALTY).clamp(0.0, 1.0);
                field.rejection = Some(RejectReason::NormalizationFailed);
                field.note = Some(e.to_string());
            }
        }
        field.raw_text = Some(text);
        field
    }
}

fn checkpoint(cancel: &AtomicBool) -> Result<(), PipelineError> {
    if cancel.load(Ordering::Acquire) {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}
