//! Closed vocabularies resolved at configuration load time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic field category a region detector can output.
///
/// The configured list of classes defines the complete output schema of an
/// [`InvoiceRecord`](crate::models::record::InvoiceRecord).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionClass {
    InvoiceNumber,
    Date,
    TotalAmount,
    SupplierName,
    /// Taxpayer identification number (INN).
    Inn,
    ItemsTable,
    Address,
    PaymentInfo,
    Logo,
}

/// Which normalization rule applies to a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Date,
    Amount,
    TaxId,
    LineItems,
}

impl DetectionClass {
    /// Every class, in canonical order.
    pub const ALL: [DetectionClass; 9] = [
        DetectionClass::InvoiceNumber,
        DetectionClass::Date,
        DetectionClass::TotalAmount,
        DetectionClass::SupplierName,
        DetectionClass::Inn,
        DetectionClass::ItemsTable,
        DetectionClass::Address,
        DetectionClass::PaymentInfo,
        DetectionClass::Logo,
    ];

    /// The wire name of the class.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionClass::InvoiceNumber => "invoice_number",
            DetectionClass::Date => "date",
            DetectionClass::TotalAmount => "total_amount",
            DetectionClass::SupplierName => "supplier_name",
            DetectionClass::Inn => "inn",
            DetectionClass::ItemsTable => "items_table",
            DetectionClass::Address => "address",
            DetectionClass::PaymentInfo => "payment_info",
            DetectionClass::Logo => "logo",
        }
    }

    /// Parse a class from its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name.trim())
    }

    /// The normalization rule for values of this class.
    pub fn kind(&self) -> FieldKind {
        match self {
            DetectionClass::Date => FieldKind::Date,
            DetectionClass::TotalAmount => FieldKind::Amount,
            DetectionClass::Inn => FieldKind::TaxId,
            DetectionClass::ItemsTable => FieldKind::LineItems,
            _ => FieldKind::Text,
        }
    }
}

impl fmt::Display for DetectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognition language; also selects date and amount locale rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ru,
    Pl,
    De,
}

impl Language {
    /// The decimal separator used by this locale.
    pub fn decimal_separator(&self) -> char {
        match self {
            Language::En => '.',
            Language::Ru | Language::Pl | Language::De => ',',
        }
    }

    /// ISO 639-1 code.
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
            Language::Pl => "pl",
            Language::De => "de",
        }
    }
}

/// Compute device hint passed to the detection and recognition capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    /// Accelerators hold a single model context and are exclusive by default.
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, Device::Cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names_roundtrip() {
        for class in DetectionClass::ALL {
            assert_eq!(DetectionClass::from_name(class.as_str()), Some(class));
            let json = serde_json::to_string(&class).unwrap();
            assert_eq!(json, format!("\"{}\"", class.as_str()));
        }
        assert_eq!(DetectionClass::from_name("signature"), None);
    }

    #[test]
    fn test_unknown_class_rejected() {
        let parsed: Result<Vec<DetectionClass>, _> = serde_json::from_str(r#"["date", "stamp"]"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_field_kinds() {
        assert_eq!(DetectionClass::Date.kind(), FieldKind::Date);
        assert_eq!(DetectionClass::TotalAmount.kind(), FieldKind::Amount);
        assert_eq!(DetectionClass::SupplierName.kind(), FieldKind::Text);
    }

    #[test]
    fn test_locale_separators() {
        assert_eq!(Language::En.decimal_separator(), '.');
        assert_eq!(Language::Ru.decimal_separator(), ',');
    }
}
