//! Structured invoice records produced by the pipeline.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::models::schema::DetectionClass;
use crate::models::task::TaskId;
use crate::ocr::Region;

/// A normalized field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Amount(Decimal),
    /// Tax id reduced to its digits.
    TaxId(String),
    LineItems(Vec<LineItem>),
}

impl FieldValue {
    /// Canonical text rendering; normalizing it again yields the same value.
    pub fn canonical(&self) -> String {
        match self {
            FieldValue::Text(text) | FieldValue::TaxId(text) => text.clone(),
            FieldValue::Date(date) => date.format("%Y-%m-%d").to_string(),
            FieldValue::Amount(amount) => format!("{:.2}", amount),
            FieldValue::LineItems(items) => items
                .iter()
                .map(LineItem::canonical)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A single row of the items table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    /// Product/service name.
    pub name: String,
    pub quantity: Decimal,
    /// Unit price.
    pub price: Decimal,
    /// Row total.
    pub amount: Decimal,
}

impl LineItem {
    fn canonical(&self) -> String {
        format!(
            "{}\t{:.2}\t{:.2}\t{:.2}",
            self.name, self.quantity, self.price, self.amount
        )
    }
}

/// Why a field is not part of the accepted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// No detection of this class.
    NotDetected,
    /// Text recognition failed for the region.
    Unrecognized,
    /// The normalization rule rejected the text.
    NormalizationFailed,
    /// Confidence below the configured threshold.
    BelowThreshold,
}

/// A field derived from a detection plus its recognized text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedField {
    #[serde(skip)]
    pub class: DetectionClass,

    /// Normalized value, when normalization succeeded.
    pub value: Option<FieldValue>,

    /// Confidence (0.0 - 1.0).
    pub confidence: f32,

    /// Whether the field passed the confidence gate.
    pub accepted: bool,

    /// Recognized text before normalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectReason>,

    /// Human-readable detail for the rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Source region in page coordinates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
}

impl ExtractedField {
    /// Placeholder for a configured class without any detection.
    pub fn not_detected(class: DetectionClass) -> Self {
        Self {
            class,
            value: None,
            confidence: 0.0,
            accepted: false,
            raw_text: None,
            rejection: Some(RejectReason::NotDetected),
            note: None,
            region: None,
        }
    }
}

/// Overall extraction status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Every configured class is present and accepted.
    Complete,
    /// Some classes are missing or rejected.
    PartiallyExtracted,
    /// No field was accepted.
    Failed,
}

/// The pipeline's output unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceRecord {
    pub task_id: TaskId,

    /// One entry per configured class, in configuration order.
    #[serde(serialize_with = "serialize_fields")]
    pub fields: Vec<ExtractedField>,

    pub status: RecordStatus,

    /// Missing or rejected classes, in configuration order.
    pub missing: Vec<DetectionClass>,
}

impl InvoiceRecord {
    /// Look up the field of a class.
    pub fn get(&self, class: DetectionClass) -> Option<&ExtractedField> {
        self.fields.iter().find(|f| f.class == class)
    }

    /// Accepted fields, in configuration order.
    pub fn accepted(&self) -> impl Iterator<Item = &ExtractedField> {
        self.fields.iter().filter(|f| f.accepted)
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted().count()
    }

    /// Classes in output order.
    pub fn classes(&self) -> Vec<DetectionClass> {
        self.fields.iter().map(|f| f.class).collect()
    }
}

fn serialize_fields<S: Serializer>(fields: &[ExtractedField], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for field in fields {
        map.serialize_entry(field.class.as_str(), field)?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn accepted(class: DetectionClass, value: FieldValue) -> ExtractedField {
        ExtractedField {
            class,
            value: Some(value),
            confidence: 0.93,
            accepted: true,
            raw_text: None,
            rejection: None,
            note: None,
            region: None,
        }
    }

    #[test]
    fn test_canonical_rendering() {
        let date = FieldValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(date.canonical(), "2024-01-15");

        let amount = FieldValue::Amount(Decimal::from_str("1234.5").unwrap());
        assert_eq!(amount.canonical(), "1234.50");
    }

    #[test]
    fn test_record_serializes_as_ordered_map() {
        let record = InvoiceRecord {
            task_id: "t-1".to_string(),
            fields: vec![
                accepted(DetectionClass::TotalAmount, FieldValue::Amount(Decimal::from_str("10.00").unwrap())),
                ExtractedField::not_detected(DetectionClass::Date),
            ],
            status: RecordStatus::PartiallyExtracted,
            missing: vec![DetectionClass::Date],
        };

        let json = serde_json::to_string(&record).unwrap();
        let total = json.find("\"total_amount\"").unwrap();
        let date = json.find("\"date\"").unwrap();
        assert!(total < date, "field order must follow configuration: {json}");

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["fields"]["total_amount"]["value"], "10.00");
        assert_eq!(value["fields"]["total_amount"]["accepted"], true);
        assert_eq!(value["fields"]["date"]["value"], serde_json::Value::Null);
        assert_eq!(value["fields"]["date"]["rejection"], "not_detected");
        assert_eq!(value["status"], "partially_extracted");
        assert_eq!(value["missing"][0], "date");
    }

    #[test]
    fn test_accepted_iterator() {
        let record = InvoiceRecord {
            task_id: "t-2".to_string(),
            fields: vec![
                accepted(DetectionClass::InvoiceNumber, FieldValue::Text("FV/1/2024".into())),
                ExtractedField::not_detected(DetectionClass::Inn),
            ],
            status: RecordStatus::PartiallyExtracted,
            missing: vec![DetectionClass::Inn],
        };
        assert_eq!(record.accepted_count(), 1);
        assert!(record.get(DetectionClass::Inn).is_some());
        assert!(record.get(DetectionClass::Logo).is_none());
    }
}
