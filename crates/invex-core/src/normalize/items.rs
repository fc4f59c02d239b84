//! Items table parsing.
//!
//! Recognized table text is split into rows by line and into cells on tabs,
//! pipes or runs of two or more spaces. The last three cells of a row are
//! quantity, unit price and row total; the cells before them form the name.
//! Rows whose numeric cells do not parse (headers, subtotals) are skipped.

use rust_decimal::Decimal;
use tracing::trace;

use super::amounts::parse_amount;
use super::patterns::{QUANTITY_UNIT, TABLE_CELL_SEPARATOR};
use crate::error::NormalizationError;
use crate::models::record::LineItem;
use crate::models::schema::Language;

/// Minimum number of cells in a line item row.
const MIN_COLUMNS: usize = 4;

/// Parse every line item row of a table.
pub fn parse_line_items(text: &str, languages: &[Language]) -> Result<Vec<LineItem>, NormalizationError> {
    let items: Vec<LineItem> = text
        .lines()
        .filter_map(|line| {
            let item = parse_row(line, languages);
            if item.is_none() && !line.trim().is_empty() {
                trace!(row = line, "skipping items table row");
            }
            item
        })
        .collect();

    if items.is_empty() {
        return Err(NormalizationError::NoLineItems);
    }
    Ok(items)
}

fn parse_row(line: &str, languages: &[Language]) -> Option<LineItem> {
    let mut cells: Vec<&str> = TABLE_CELL_SEPARATOR
        .split(line.trim())
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .collect();
    if cells.len() < MIN_COLUMNS {
        return None;
    }

    // Leading row number column
    if cells.len() > MIN_COLUMNS && cells[0].chars().all(|c| c.is_ascii_digit() || c == '.') {
        cells.remove(0);
    }

    let numeric = cells.split_off(cells.len() - 3);
    let quantity = parse_quantity(numeric[0], languages)?;
    let price = parse_amount(numeric[1], languages).ok()?;
    let amount = parse_amount(numeric[2], languages).ok()?;

    let name = cells.join(" ");
    if name.chars().all(|c| !c.is_alphabetic()) {
        return None;
    }

    Some(LineItem {
        name,
        quantity,
        price,
        amount,
    })
}

fn parse_quantity(cell: &str, languages: &[Language]) -> Option<Decimal> {
    let without_unit = QUANTITY_UNIT.replace(cell, "");
    parse_amount(&without_unit, languages).ok()
}
