//! Monetary amount normalization.
//!
//! Separators are resolved structurally where possible ("1 234,56",
//! "1,234.56", "1.234.567") and by the configured locales otherwise. Amounts
//! are rounded half away from zero to two decimal places.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use super::patterns::CURRENCY;
use crate::error::NormalizationError;
use crate::models::schema::Language;

/// How a separator character is used in an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeparatorRole {
    Decimal,
    Grouping,
}

/// Parse an amount, resolving separators under the configured locales.
pub fn parse_amount(text: &str, languages: &[Language]) -> Result<Decimal, NormalizationError> {
    let not_numeric = || NormalizationError::NotNumeric(text.to_string());

    let stripped = CURRENCY.replace_all(text, "");
    let compact: String = stripped.chars().filter(|c| !c.is_whitespace()).collect();

    let (negative, body) = match compact.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, compact.as_str()),
    };
    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.') {
        return Err(not_numeric());
    }

    let (integer, fraction) = match resolve_decimal_separator(body, languages, text)? {
        Some((decimal_pos, grouping)) => {
            let integer = strip_grouping(&body[..decimal_pos], grouping).ok_or_else(not_numeric)?;
            let fraction = &body[decimal_pos + 1..];
            if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
                return Err(not_numeric());
            }
            (integer, fraction.to_string())
        }
        None => {
            let grouping = body.chars().find(|c| !c.is_ascii_digit());
            (strip_grouping(body, grouping).ok_or_else(not_numeric)?, "0".to_string())
        }
    };

    let sign = if negative { "-" } else { "" };
    let mut amount = Decimal::from_str(&format!("{sign}{integer}.{fraction}"))
        .map_err(|_| not_numeric())?
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    amount.rescale(2);
    Ok(amount)
}

/// Locate the decimal separator, if any.
///
/// Returns the byte position of the decimal separator and the grouping
/// character used before it.
fn resolve_decimal_separator(
    body: &str,
    languages: &[Language],
    original: &str,
) -> Result<Option<(usize, Option<char>)>, NormalizationError> {
    let commas = body.matches(',').count();
    let dots = body.matches('.').count();

    match (commas, dots) {
        (0, 0) => Ok(None),
        (c, d) if c > 0 && d > 0 => {
            // Two distinct separators: the last one is decimal and must be unique.
            let (decimal_pos, decimal) = body
                .char_indices()
                .filter(|(_, c)| *c == ',' || *c == '.')
                .last()
                .ok_or_else(|| NormalizationError::NotNumeric(original.to_string()))?;
            let grouping = if decimal == ',' { '.' } else { ',' };
            if body.matches(decimal).count() != 1 {
                return Err(NormalizationError::NotNumeric(original.to_string()));
            }
            Ok(Some((decimal_pos, Some(grouping))))
        }
        (c, d) if c + d > 1 => Ok(None),
        _ => {
            let separator = if commas == 1 { ',' } else { '.' };
            let pos = body.find(separator).unwrap_or_default();
            let trailing = body.len() - pos - 1;
            if trailing != 3 {
                return Ok(Some((pos, None)));
            }
            match locale_role(separator, languages) {
                Some(SeparatorRole::Decimal) => Ok(Some((pos, None))),
                Some(SeparatorRole::Grouping) => Ok(None),
                None => Err(NormalizationError::AmbiguousAmount(original.to_string())),
            }
        }
    }
}

/// The role every configured locale agrees on, if they agree.
fn locale_role(separator: char, languages: &[Language]) -> Option<SeparatorRole> {
    let mut roles = languages.iter().map(|language| {
        if language.decimal_separator() == separator {
            SeparatorRole::Decimal
        } else {
            SeparatorRole::Grouping
        }
    });
    let first = roles.next()?;
    roles.all(|role| role == first).then_some(first)
}

/// Remove grouping separators, checking that every group after the first has three digits.
fn strip_grouping(integer: &str, grouping: Option<char>) -> Option<String> {
    if integer.is_empty() {
        return None;
    }
    let Some(grouping) = grouping else {
        return integer.chars().all(|c| c.is_ascii_digit()).then(|| integer.to_string());
    };

    let groups: Vec<&str> = integer.split(grouping).collect();
    let (first, rest) = groups.split_first()?;
    let first_ok = (1..=3).contains(&first.len()) || groups.len() == 1;
    let digits_only = groups.iter().all(|g| g.chars().all(|c| c.is_ascii_digit()));
    if !first_ok || !digits_only || first.is_empty() || rest.iter().any(|g| g.len() != 3) {
        return None;
    }
    Some(groups.concat())
}
