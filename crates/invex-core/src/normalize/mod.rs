//! Deterministic field normalization.
//!
//! Each rule is pure and idempotent: normalizing the canonical rendering of
//! a normalized value yields the same value.

pub mod amounts;
pub mod dates;
pub mod items;
pub mod patterns;
pub mod tax_id;

pub use amounts::parse_amount;
pub use dates::parse_date;
pub use items::parse_line_items;
pub use tax_id::parse_tax_id;

use crate::error::NormalizationError;
use crate::models::config::{InvexConfig, PostprocessConfig};
use crate::models::record::FieldValue;
use crate::models::schema::{DetectionClass, FieldKind, Language};
use patterns::WHITESPACE_RUN;

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned()
}

/// Applies the per-class normalization rules enabled in the configuration.
#[derive(Debug, Clone)]
pub struct Normalizer {
    rules: PostprocessConfig,
    languages: Vec<Language>,
}

impl Normalizer {
    pub fn new(rules: PostprocessConfig, languages: Vec<Language>) -> Self {
        Self { rules, languages }
    }

    pub fn from_config(config: &InvexConfig) -> Self {
        Self::new(config.postprocess.clone(), config.recognition.languages.clone())
    }

    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    /// Normalize the recognized text of a field.
    ///
    /// A disabled typed rule falls back to the whitespace rule, or to the raw
    /// text when that is disabled too.
    pub fn normalize(&self, class: DetectionClass, raw: &str) -> Result<FieldValue, NormalizationError> {
        if raw.trim().is_empty() {
            return Err(NormalizationError::Empty);
        }

        match class.kind() {
            FieldKind::Date if self.rules.date => {
                parse_date(&collapse_whitespace(raw), &self.languages).map(FieldValue::Date)
            }
            FieldKind::Amount if self.rules.amount => parse_amount(raw, &self.languages).map(FieldValue::Amount),
            FieldKind::TaxId if self.rules.tax_id => parse_tax_id(raw).map(FieldValue::TaxId),
            // Cell boundaries depend on whitespace runs, so the table sees the raw text.
            FieldKind::LineItems if self.rules.items_table => {
                parse_line_items(raw, &self.languages).map(FieldValue::LineItems)
            }
            _ => Ok(FieldValue::Text(self.text(raw))),
        }
    }

    /// Normalize and render canonically, for comparisons.
    pub fn canonical(&self, class: DetectionClass, raw: &str) -> Option<String> {
        self.normalize(class, raw).ok().map(|value| value.canonical())
    }

    fn text(&self, raw: &str) -> String {
        if self.rules.whitespace {
            collapse_whitespace(raw)
        } else {
            raw.to_string()
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from_config(&InvexConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn idempotent(normalizer: &Normalizer, class: DetectionClass, raw: &str) {
        let first = normalizer.normalize(class, raw).unwrap();
        let second = normalizer.normalize(class, &first.canonical()).unwrap();
        assert_eq!(first, second, "{class} rule is not idempotent for {raw:?}");
    }

    #[test]
    fn test_whitespace_rule() {
        let normalizer = Normalizer::default();
        assert_eq!(
            normalizer.normalize(DetectionClass::SupplierName, "  ООО   \"Ромашка\"\n "),
            Ok(FieldValue::Text("ООО \"Ромашка\"".to_string()))
        );
        assert_eq!(
            normalizer.normalize(DetectionClass::Address, " \t\n"),
            Err(NormalizationError::Empty)
        );
    }

    #[test]
    fn test_typed_rules() {
        let normalizer = Normalizer::default();
        assert_eq!(
            normalizer.normalize(DetectionClass::Date, "15 января 2024"),
            Ok(FieldValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()))
        );
        assert_eq!(
            normalizer.normalize(DetectionClass::TotalAmount, "1 234,56 руб."),
            Ok(FieldValue::Amount(Decimal::from_str("1234.56").unwrap()))
        );
        assert_eq!(
            normalizer.normalize(DetectionClass::Inn, "ИНН 7707083893"),
            Ok(FieldValue::TaxId("7707083893".to_string()))
        );
    }

    #[test]
    fn test_disabled_rule_falls_back_to_whitespace() {
        let rules = PostprocessConfig {
            date: false,
            ..PostprocessConfig::default()
        };
        let normalizer = Normalizer::new(rules, vec![Language::Ru]);
        assert_eq!(
            normalizer.normalize(DetectionClass::Date, " 15.01.2024  г. "),
            Ok(FieldValue::Text("15.01.2024 г.".to_string()))
        );
    }

    #[test]
    fn test_all_rules_disabled_keeps_raw_text() {
        let rules = PostprocessConfig {
            whitespace: false,
            date: false,
            amount: false,
            tax_id: false,
            items_table: false,
        };
        let normalizer = Normalizer::new(rules, vec![Language::En]);
        assert_eq!(
            normalizer.normalize(DetectionClass::TotalAmount, " 1,234.56 "),
            Ok(FieldValue::Text(" 1,234.56 ".to_string()))
        );
    }

    #[test]
    fn test_rules_are_idempotent() {
        let normalizer = Normalizer::default();
        idempotent(&normalizer, DetectionClass::Date, "15.01.24");
        idempotent(&normalizer, DetectionClass::Date, "3 марта 2023 г.");
        idempotent(&normalizer, DetectionClass::TotalAmount, "12 345 678,9 руб.");
        idempotent(&normalizer, DetectionClass::TotalAmount, "$1,234.567");
        idempotent(&normalizer, DetectionClass::Inn, "ИНН: 7707 083 893");
        idempotent(&normalizer, DetectionClass::SupplierName, "  ООО   Ромашка ");
        idempotent(
            &normalizer,
            DetectionClass::ItemsTable,
            "Наименование  Кол-во  Цена  Сумма\nБумага  2  250,00  500,00",
        );
    }

    #[test]
    fn test_canonical_comparison() {
        let normalizer = Normalizer::default();
        assert_eq!(
            normalizer.canonical(DetectionClass::Date, "15.01.2024"),
            normalizer.canonical(DetectionClass::Date, "2024-01-15")
        );
        assert_eq!(normalizer.canonical(DetectionClass::TotalAmount, "n/a"), None);
    }
}
