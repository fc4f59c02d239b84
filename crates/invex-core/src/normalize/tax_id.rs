//! Taxpayer identification number (INN) normalization.

use crate::error::NormalizationError;

/// Reduce a tax id to its digits; a valid INN has 10 (organisation) or 12
/// (individual) digits.
pub fn parse_tax_id(text: &str) -> Result<String, NormalizationError> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 | 12 => Ok(digits),
        _ => Err(NormalizationError::InvalidTaxId(text.to_string())),
    }
}
