//! Rolling extraction-quality monitoring.
//!
//! Tasks submitted with ground truth contribute a [`QualitySample`]. The
//! monitor keeps the most recent samples, derives precision, recall and F1
//! from them, and raises an alert when any metric falls below its minimum.
//! The alert clears once every metric has recovered.

mod matcher;

pub use matcher::{ExactMatcher, FieldMatcher, NormalizedMatcher};

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::config::QualityConfig;
use crate::models::record::InvoiceRecord;
use crate::models::schema::DetectionClass;
use crate::models::task::{GroundTruth, TaskId};

/// Capacity of the alert broadcast channel.
const ALERT_CHANNEL_CAPACITY: usize = 16;

/// Per-field confusion counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FieldCounts {
    #[serde(rename = "tp")]
    pub true_positives: u32,
    #[serde(rename = "fp")]
    pub false_positives: u32,
    #[serde(rename = "fn")]
    pub false_negatives: u32,
}

impl FieldCounts {
    fn add(&mut self, other: &FieldCounts) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }
}

/// Correctness of one task's record against its ground truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualitySample {
    pub task_id: TaskId,
    /// Per-field outcome, for the configured classes.
    pub fields: BTreeMap<DetectionClass, FieldCounts>,
    /// Accepted fields matching the ground truth.
    pub true_positives: u32,
    /// Accepted fields.
    pub accepted: u32,
    /// Fields with a ground-truth value.
    pub ground_truth: u32,
}

impl QualitySample {
    /// Score a record against ground truth.
    ///
    /// Only configured classes (the record's fields) are scored; ground truth
    /// for other classes is ignored.
    pub fn evaluate(record: &InvoiceRecord, truth: &GroundTruth, matcher: &dyn FieldMatcher) -> Self {
        let mut sample = QualitySample {
            task_id: record.task_id.clone(),
            fields: BTreeMap::new(),
            true_positives: 0,
            accepted: 0,
            ground_truth: 0,
        };

        for field in &record.fields {
            let expected = truth.get(&field.class).filter(|v| !v.trim().is_empty());
            let accepted_value = field.value.as_ref().filter(|_| field.accepted);

            let correct = match (accepted_value, expected) {
                (Some(value), Some(expected)) => matcher.matches(field.class, value, expected),
                _ => false,
            };

            let counts = FieldCounts {
                true_positives: u32::from(correct),
                false_positives: u32::from(accepted_value.is_some() && !correct),
                false_negatives: u32::from(expected.is_some() && !correct),
            };

            sample.true_positives += counts.true_positives;
            sample.accepted += u32::from(accepted_value.is_some());
            sample.ground_truth += u32::from(expected.is_some());
            sample.fields.insert(field.class, counts);
        }

        sample
    }
}

/// A monitored metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Precision,
    Recall,
    F1,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Precision => f.write_str("precision"),
            Metric::Recall => f.write_str("recall"),
            Metric::F1 => f.write_str("f1"),
        }
    }
}

/// A metric below its configured minimum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breach {
    pub metric: Metric,
    pub value: f64,
    pub minimum: f64,
}

/// Alert state transitions, published on the monitor's broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityAlert {
    Raised { breaches: Vec<Breach> },
    Cleared,
}

/// Rolling metrics at a point in time.
///
/// A metric whose denominator is zero is `None` and never breaches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualitySnapshot {
    pub samples: usize,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub per_field: BTreeMap<DetectionClass, FieldCounts>,
    pub alerting: bool,
    pub breaches: Vec<Breach>,
}

#[derive(Debug, Default)]
struct MonitorState {
    window: VecDeque<QualitySample>,
    alerting: bool,
}

/// Process-wide rolling quality aggregate.
#[derive(Debug)]
pub struct QualityMonitor {
    config: QualityConfig,
    state: Mutex<MonitorState>,
    alerts: broadcast::Sender<QualityAlert>,
}

impl QualityMonitor {
    pub fn new(config: QualityConfig) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            config,
            state: Mutex::new(MonitorState::default()),
            alerts,
        }
    }

    /// Receive alert transitions from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QualityAlert> {
        self.alerts.subscribe()
    }

    /// Add a sample to the window, returning the alert transition it caused.
    pub fn record(&self, sample: QualitySample) -> Option<QualityAlert> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        debug!(
            task_id = %sample.task_id,
            tp = sample.true_positives,
            accepted = sample.accepted,
            ground_truth = sample.ground_truth,
            "quality sample recorded"
        );
        state.window.push_back(sample);
        while state.window.len() > self.config.window_size {
            state.window.pop_front();
        }

        let snapshot = self.compute(&state.window, state.alerting);
        let transition = match (state.alerting, snapshot.breaches.is_empty()) {
            (false, false) => Some(QualityAlert::Raised {
                breaches: snapshot.breaches.clone(),
            }),
            (true, true) => Some(QualityAlert::Cleared),
            _ => None,
        };

        match &transition {
            Some(QualityAlert::Raised { breaches }) => {
                state.alerting = true;
                for breach in breaches {
                    warn!(
                        metric = %breach.metric,
                        value = breach.value,
                        minimum = breach.minimum,
                        "extraction quality below minimum"
                    );
                }
            }
            Some(QualityAlert::Cleared) => {
                state.alerting = false;
                info!(
                    precision = ?snapshot.precision,
                    recall = ?snapshot.recall,
                    f1 = ?snapshot.f1,
                    "extraction quality recovered"
                );
            }
            None => {}
        }
        drop(state);

        if let Some(alert) = &transition {
            // No subscribers is fine.
            let _ = self.alerts.send(alert.clone());
        }
        transition
    }

    /// Current rolling metrics.
    pub fn snapshot(&self) -> QualitySnapshot {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.compute(&state.window, state.alerting)
    }

    pub fn is_alerting(&self) -> bool {
        self.state.lock().map(|s| s.alerting).unwrap_or_else(|poisoned| poisoned.into_inner().alerting)
    }

    fn compute(&self, window: &VecDeque<QualitySample>, alerting: bool) -> QualitySnapshot {
        let mut per_field: BTreeMap<DetectionClass, FieldCounts> = BTreeMap::new();
        let (mut tp, mut accepted, mut truth) = (0u64, 0u64, 0u64);

        for sample in window {
            tp += u64::from(sample.true_positives);
            accepted += u64::from(sample.accepted);
            truth += u64::from(sample.ground_truth);
            for (class, counts) in &sample.fields {
                per_field.entry(*class).or_default().add(counts);
            }
        }

        let ratio = |num: u64, den: u64| (den > 0).then(|| num as f64 / den as f64);
        let precision = ratio(tp, accepted);
        let recall = ratio(tp, truth);
        let f1 = match (precision, recall) {
            (Some(p), Some(r)) if p + r > 0.0 => Some(2.0 * p * r / (p + r)),
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        };

        let breaches = [
            (Metric::Precision, precision, self.config.min_precision),
            (Metric::Recall, recall, self.config.min_recall),
            (Metric::F1, f1, self.config.min_f1),
        ]
        .into_iter()
        .filter_map(|(metric, value, minimum)| {
            value
                .filter(|v| *v < minimum)
                .map(|value| Breach { metric, value, minimum })
        })
        .collect();

        QualitySnapshot {
            samples: window.len(),
            precision,
            recall,
            f1,
            per_field,
            alerting,
            breaches,
        }
    }
}
