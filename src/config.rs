//! Configuration for the inventory dashboard engine.
//!
//! Persisted as a single JSON record. Every field carries a serde default,
//! so partial or older saved configs merge over the documented defaults on
//! load instead of failing.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lower bound for the rotation interval, in seconds.
pub const MIN_ROTATION_INTERVAL_SECS: u64 = 5;
/// Upper bound for the rotation interval, in seconds.
pub const MAX_ROTATION_INTERVAL_SECS: u64 = 300;

/// Top-level dashboard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardConfig {
    /// OAuth client ID used by the credential issuance flow.
    pub client_id: String,
    /// Backing spreadsheet ID.
    pub spreadsheet_id: String,
    /// Sheet (tab) name holding the inventory table.
    pub sheet_name: String,
    /// Seconds between item rotations. Clamped to [5, 300] at use.
    pub rotation_interval_secs: u64,
    /// Number of rows shown in the sampled-items table.
    pub table_rows: usize,
    /// Display-frequency weights per expiry category.
    pub weights: SelectionWeights,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            spreadsheet_id: String::new(),
            sheet_name: "Master".to_owned(),
            rotation_interval_secs: 60,
            table_rows: 10,
            weights: SelectionWeights::default(),
        }
    }
}

/// Weight-per-category configuration for the selector.
///
/// Values are advisory non-negative integer percentages. Nothing enforces
/// that they sum to 100; the selector normalizes over the effective pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionWeights {
    /// Weight for items expired or expiring within 7 days.
    pub expired: u32,
    /// Weight for items expiring within 30 days.
    pub soon: u32,
    /// Weight for items expiring within 90 days.
    pub medium: u32,
    /// Weight for items expiring within 180 days.
    pub later: u32,
    /// Weight for everything further out.
    pub fresh: u32,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            expired: 50,
            soon: 25,
            medium: 15,
            later: 7,
            fresh: 3,
        }
    }
}

impl SelectionWeights {
    /// Weight assigned to one expiry category.
    #[must_use]
    pub fn weight_for(&self, category: crate::expiry::ExpiryCategory) -> u32 {
        use crate::expiry::ExpiryCategory;
        match category {
            ExpiryCategory::Expired => self.expired,
            ExpiryCategory::Soon => self.soon,
            ExpiryCategory::Medium => self.medium,
            ExpiryCategory::Later => self.later,
            ExpiryCategory::Fresh => self.fresh,
        }
    }
}

impl DashboardConfig {
    /// Rotation interval clamped to the supported range.
    #[must_use]
    pub fn rotation_interval(&self) -> std::time::Duration {
        let secs = self
            .rotation_interval_secs
            .clamp(MIN_ROTATION_INTERVAL_SECS, MAX_ROTATION_INTERVAL_SECS);
        std::time::Duration::from_secs(secs)
    }

    /// Default on-disk location (`<config dir>/larder/settings.json`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("larder").join("settings.json"))
    }

    /// Load from a JSON file, merging over defaults.
    ///
    /// A missing file yields the default config. Unknown fields are ignored
    /// and missing fields take their defaults, so configs saved by older
    /// versions remain valid.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when the file exists but does not
    /// parse as JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| EngineError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Persist to a JSON file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] on filesystem failures.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, text)?;
        debug!("saved config to {}", path.display());
        Ok(())
    }
}
