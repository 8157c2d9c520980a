//! Backing-store gateway.
//!
//! The engine depends on the tabular store only through the narrow
//! [`SheetStore`] read/write contract. [`SheetsClient`] implements it
//! against the Google Sheets values API; tests and other embedders can
//! substitute their own implementation.

use crate::error::{EngineError, Result};
use crate::item::format_sheet_date;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

/// Production Sheets API endpoint.
const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";

/// Quantity write-back payload for one sheet row (columns D through G).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    /// New storage quantity.
    pub quantity_storage: u32,
    /// New kitchen quantity.
    pub quantity_kitchen: u32,
    /// Expiry date, written back unchanged.
    pub expiry_date: Option<NaiveDate>,
    /// Last-update stamp (today).
    pub last_update: NaiveDate,
}

impl RowUpdate {
    /// The 4-element cell row the range write carries.
    #[must_use]
    pub fn cells(&self) -> [String; 4] {
        [
            self.quantity_storage.to_string(),
            self.quantity_kitchen.to_string(),
            self.expiry_date.map(format_sheet_date).unwrap_or_default(),
            format_sheet_date(self.last_update),
        ]
    }
}

/// Read/write contract to the tabular backing store.
///
/// An unauthorized response from either operation maps to
/// [`EngineError::SessionExpired`], which the engine routes into the
/// credential lifecycle as forced invalidation.
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Fetch the raw 2-D string table (row 0 is the header).
    ///
    /// # Errors
    ///
    /// [`EngineError::SessionExpired`] on HTTP 401,
    /// [`EngineError::Network`] otherwise.
    async fn fetch_rows(&self, credential: &str) -> Result<Vec<Vec<String>>>;

    /// Write one row's quantity range (`D{row}:G{row}`).
    ///
    /// # Errors
    ///
    /// [`EngineError::SessionExpired`] on HTTP 401,
    /// [`EngineError::Write`] otherwise.
    async fn write_range(
        &self,
        credential: &str,
        row_index: usize,
        update: &RowUpdate,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Google Sheets values API client.
#[derive(Clone)]
pub struct SheetsClient {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    sheet_name: String,
}

impl SheetsClient {
    /// Create a client for one spreadsheet tab.
    #[must_use]
    pub fn new(spreadsheet_id: &str, sheet_name: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            spreadsheet_id: spreadsheet_id.to_owned(),
            sheet_name: sheet_name.to_owned(),
        }
    }

    /// Override the API base URL (mock servers in tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url,
            self.spreadsheet_id,
            urlencoding::encode(range)
        )
    }
}

#[async_trait]
impl SheetStore for SheetsClient {
    async fn fetch_rows(&self, credential: &str) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(&self.sheet_name);
        debug!("fetching rows from {url}");

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EngineError::SessionExpired);
        }
        if !response.status().is_success() {
            return Err(EngineError::Network(format!(
                "fetch failed with status {}",
                response.status()
            )));
        }

        let range: ValueRange = response
            .json()
            .await
            .map_err(|e| EngineError::Network(format!("cannot decode response: {e}")))?;
        Ok(range.values)
    }

    async fn write_range(
        &self,
        credential: &str,
        row_index: usize,
        update: &RowUpdate,
    ) -> Result<()> {
        let range = format!("{}!D{row_index}:G{row_index}", self.sheet_name);
        let url = format!("{}?valueInputOption=RAW", self.values_url(&range));
        debug!("writing {range}");

        let body = serde_json::json!({ "values": [update.cells()] });
        let response = self
            .client
            .put(&url)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Write(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EngineError::SessionExpired);
        }
        if !response.status().is_success() {
            return Err(EngineError::Write(format!(
                "write failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
