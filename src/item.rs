//! Inventory item model and sheet-row parsing.
//!
//! Rows come back from the backing store as a 2-D string array. Row 0 is a
//! header and is discarded; columns map positionally to category, name,
//! size, storage quantity, kitchen quantity, expiry date (`DD/MM/YYYY`
//! text) and last-update date. Rows with an empty name are skipped.

use crate::error::{EngineError, Result};
use crate::expiry::ExpiryCategory;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single inventory item tied to its backing-store row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Free-form category text from the sheet (e.g. "Tins").
    pub category: String,
    /// Item name. Required; rows without one are excluded at parse time.
    pub name: String,
    /// Optional size/volume text.
    pub size: Option<String>,
    /// Quantity held in storage. Clamped at zero.
    pub quantity_storage: u32,
    /// Quantity held in the kitchen. Clamped at zero.
    pub quantity_kitchen: u32,
    /// Expiry date, if the sheet cell parsed.
    pub expiry_date: Option<NaiveDate>,
    /// Date of the last quantity update, if the sheet cell parsed.
    pub last_update: Option<NaiveDate>,
    /// 1-based sheet row this item lives in. Row 1 is the header, so the
    /// first data row is 2. Unique within a loaded collection and never
    /// reassigned.
    pub row_index: usize,
}

/// Which physical location a quantity adjustment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Long-term storage shelf.
    Storage,
    /// In-kitchen stock.
    Kitchen,
}

impl Item {
    /// Urgency category of this item relative to `today`.
    #[must_use]
    pub fn expiry_category(&self, today: NaiveDate) -> ExpiryCategory {
        ExpiryCategory::for_date(self.expiry_date, today)
    }

    /// Apply a signed quantity delta to one location, clamping at zero,
    /// and stamp the last-update date.
    pub fn apply_delta(&mut self, location: Location, delta: i32, today: NaiveDate) {
        let quantity = match location {
            Location::Storage => &mut self.quantity_storage,
            Location::Kitchen => &mut self.quantity_kitchen,
        };
        *quantity = quantity.saturating_add_signed(delta);
        self.last_update = Some(today);
    }
}

/// Parse a `DD/MM/YYYY` sheet cell. Blank or malformed text yields `None`.
#[must_use]
pub fn parse_sheet_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%d/%m/%Y").ok()
}

/// Format a date the way the sheet stores it (`DD/MM/YYYY`).
#[must_use]
pub fn format_sheet_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or_default()
}

/// Parse raw backing-store rows into items.
///
/// The first row is the header and is discarded. `row_index` is assigned as
/// the 1-based sheet position (header offset included), so it survives the
/// name filter and stays tied to the source row for write-back.
///
/// # Errors
///
/// Returns [`EngineError::DataFormat`] when the result set is empty (not
/// even a header row).
pub fn parse_rows(rows: &[Vec<String>]) -> Result<Vec<Item>> {
    if rows.is_empty() {
        return Err(EngineError::DataFormat(
            "no data found in spreadsheet".to_owned(),
        ));
    }

    let items = rows
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(index, row)| {
            let name = cell(row, 1).trim();
            if name.is_empty() {
                return None;
            }
            Some(Item {
                category: cell(row, 0).to_owned(),
                name: name.to_owned(),
                size: match cell(row, 2).trim() {
                    "" => None,
                    size => Some(size.to_owned()),
                },
                quantity_storage: cell(row, 3).trim().parse().unwrap_or(0),
                quantity_kitchen: cell(row, 4).trim().parse().unwrap_or(0),
                expiry_date: parse_sheet_date(cell(row, 5)),
                last_update: parse_sheet_date(cell(row, 6)),
                row_index: index + 1,
            })
        })
        .collect();

    Ok(items)
}
