//! Comparison of extracted values against ground truth.

use crate::models::record::FieldValue;
use crate::models::schema::DetectionClass;
use crate::normalize::Normalizer;

/// Decides whether an extracted value equals the expected ground truth.
pub trait FieldMatcher: Send + Sync {
    fn matches(&self, class: DetectionClass, extracted: &FieldValue, expected: &str) -> bool;
}

/// Exact text match of the canonical rendering against the ground truth.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatcher;

impl FieldMatcher for ExactMatcher {
    fn matches(&self, _class: DetectionClass, extracted: &FieldValue, expected: &str) -> bool {
        extracted.canonical() == expected.trim()
    }
}

/// Normalizes the ground truth with the extraction rules and compares
/// canonical values. Text values compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct NormalizedMatcher {
    normalizer: Normalizer,
}

impl NormalizedMatcher {
    pub fn new(normalizer: Normalizer) -> Self {
        Self { normalizer }
    }
}

impl FieldMatcher for NormalizedMatcher {
    fn matches(&self, class: DetectionClass, extracted: &FieldValue, expected: &str) -> bool {
        let Ok(expected) = self.normalizer.normalize(class, expected) else {
            return ExactMatcher.matches(class, extracted, expected);
        };

        match (extracted, &expected) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a.to_lowercase() == b.to_lowercase(),
            (FieldValue::LineItems(a), FieldValue::LineItems(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| {
                        x.name.to_lowercase() == y.name.to_lowercase()
                            && x.quantity == y.quantity
                            && x.price == y.price
                            && x.amount == y.amount
                    })
            }
            (a, b) => a.canonical() == b.canonical(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn test_exact_matcher() {
        let date = FieldValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert!(ExactMatcher.matches(DetectionClass::Date, &date, "2024-01-15"));
        assert!(!ExactMatcher.matches(DetectionClass::Date, &date, "15.01.2024"));
    }

    #[test]
    fn test_normalized_matcher() {
        let matcher = NormalizedMatcher::default();

        let date = FieldValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert!(matcher.matches(DetectionClass::Date, &date, "15.01.2024"));
        assert!(matcher.matches(DetectionClass::Date, &date, "15 января 2024"));

        let amount = FieldValue::Amount(Decimal::from_str("1234.50").unwrap());
        assert!(matcher.matches(DetectionClass::TotalAmount, &amount, "1 234,50 руб."));
        assert!(!matcher.matches(DetectionClass::TotalAmount, &amount, "1 234,00"));

        let supplier = FieldValue::Text("ООО Ромашка".to_string());
        assert!(matcher.matches(DetectionClass::SupplierName, &supplier, "ооо   РОМАШКА"));
    }

    #[test]
    fn test_unparseable_truth_falls_back_to_exact() {
        let matcher = NormalizedMatcher::default();
        let number = FieldValue::Text("n/a".to_string());
        assert!(matcher.matches(DetectionClass::TotalAmount, &number, "n/a"));
    }
}
