//! Confidence gate and record assembly.

use std::collections::HashMap;

use crate::models::config::DetectionConfig;
use crate::models::record::{ExtractedField, InvoiceRecord, RecordStatus, RejectReason};
use crate::models::schema::DetectionClass;

/// Accepts fields at or above the confidence threshold and assembles records
/// in configuration order.
#[derive(Debug, Clone)]
pub struct ConfidenceGate {
    threshold: f32,
    classes: Vec<DetectionClass>,
}

impl ConfidenceGate {
    pub fn new(threshold: f32, classes: Vec<DetectionClass>) -> Self {
        Self { threshold, classes }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.confidence_threshold, config.classes.clone())
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn classes(&self) -> &[DetectionClass] {
        &self.classes
    }

    pub fn is_configured(&self, class: DetectionClass) -> bool {
        self.classes.contains(&class)
    }

    /// Whether a confidence passes the gate.
    pub fn passes(&self, confidence: f32) -> bool {
        confidence >= self.threshold
    }

    /// Gate the candidate fields and assemble the record.
    ///
    /// Every configured class appears exactly once, in configuration order;
    /// classes without a candidate are reported as not detected. Candidates
    /// of unconfigured classes are dropped.
    pub fn assemble(&self, task_id: &str, candidates: Vec<ExtractedField>) -> InvoiceRecord {
        let mut by_class: HashMap<DetectionClass, ExtractedField> =
            candidates.into_iter().map(|field| (field.class, field)).collect();

        let fields: Vec<ExtractedField> = self
            .classes
            .iter()
            .map(|class| match by_class.remove(class) {
                Some(field) => self.gate(field),
                None => ExtractedField::not_detected(*class),
            })
            .collect();

        let missing: Vec<DetectionClass> = fields.iter().filter(|f| !f.accepted).map(|f| f.class).collect();
        let status = if missing.is_empty() {
            RecordStatus::Complete
        } else if missing.len() == fields.len() {
            RecordStatus::Failed
        } else {
            RecordStatus::PartiallyExtracted
        };

        InvoiceRecord {
            task_id: task_id.to_string(),
            fields,
            status,
            missing,
        }
    }

    fn gate(&self, mut field: ExtractedField) -> ExtractedField {
        field.accepted = field.value.is_some() && self.passes(field.confidence);
        if field.accepted {
            field.rejection = None;
        } else if field.rejection.is_none() {
            field.rejection = Some(RejectReason::BelowThreshold);
        }
        field
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::FieldValue;
    use pretty_assertions::assert_eq;

    fn candidate(class: DetectionClass, confidence: f32) -> ExtractedField {
        ExtractedField {
            class,
            value: Some(FieldValue::Text("value".to_string())),
            confidence,
            accepted: false,
            raw_text: Some("value".to_string()),
            rejection: None,
            note: None,
            region: None,
        }
    }

    #[test]
    fn test_partial_extraction() {
        let gate = ConfidenceGate::from_config(&DetectionConfig::default());
        let record = gate.assemble(
            "t-1",
            vec![
                candidate(DetectionClass::InvoiceNumber, 0.95),
                candidate(DetectionClass::Date, 0.6),
            ],
        );

        let accepted: Vec<DetectionClass> = record.accepted().map(|f| f.class).collect();
        assert_eq!(accepted, vec![DetectionClass::InvoiceNumber]);
        assert_eq!(record.status, RecordStatus::PartiallyExtracted);
        assert_eq!(
            record.missing,
            vec![
                DetectionClass::Date,
                DetectionClass::TotalAmount,
                DetectionClass::SupplierName,
                DetectionClass::Inn,
                DetectionClass::ItemsTable,
                DetectionClass::Address,
                DetectionClass::PaymentInfo,
            ]
        );
        assert_eq!(record.get(DetectionClass::Date).unwrap().rejection, Some(RejectReason::BelowThreshold));
        assert_eq!(
            record.get(DetectionClass::TotalAmount).unwrap().rejection,
            Some(RejectReason::NotDetected)
        );
    }

    #[test]
    fn test_configuration_order_preserved() {
        let classes = vec![DetectionClass::TotalAmount, DetectionClass::InvoiceNumber, DetectionClass::Date];
        let gate = ConfidenceGate::new(0.8, classes.clone());

        let record = gate.assemble(
            "t-2",
            vec![
                candidate(DetectionClass::Date, 0.9),
                candidate(DetectionClass::InvoiceNumber, 0.9),
                candidate(DetectionClass::TotalAmount, 0.9),
            ],
        );

        assert_eq!(record.classes(), classes);
        assert_eq!(record.status, RecordStatus::Complete);
        assert!(record.missing.is_empty());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let gate = ConfidenceGate::new(0.8, vec![DetectionClass::Date]);
        let record = gate.assemble("t-3", vec![candidate(DetectionClass::Date, 0.8)]);
        assert_eq!(record.status, RecordStatus::Complete);

        let record = gate.assemble("t-4", vec![candidate(DetectionClass::Date, 0.7999)]);
        assert_eq!(record.status, RecordStatus::Failed);
    }

    #[test]
    fn test_failed_normalization_never_accepted() {
        let gate = ConfidenceGate::new(0.5, vec![DetectionClass::Date]);
        let mut field = candidate(DetectionClass::Date, 0.99);
        field.value = None;
        field.rejection = Some(RejectReason::NormalizationFailed);

        let record = gate.assemble("t-5", vec![field]);
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(
            record.get(DetectionClass::Date).unwrap().rejection,
            Some(RejectReason::NormalizationFailed)
        );
    }

    #[test]
    fn test_unconfigured_candidates_dropped() {
        let gate = ConfidenceGate::new(0.8, vec![DetectionClass::Date]);
        let record = gate.assemble(
            "t-6",
            vec![candidate(DetectionClass::Logo, 0.99), candidate(DetectionClass::Date, 0.9)],
        );
        assert_eq!(record.classes(), vec![DetectionClass::Date]);
    }
}
