//! Expiry classification.
//!
//! Maps an optional expiry date to one of five urgency categories by
//! day-count thresholds. Pure and total; an absent date is treated as
//! unbounded and always classifies as [`ExpiryCategory::Fresh`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Urgency category derived from days-until-expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryCategory {
    /// Already expired or expiring within 7 days.
    Expired,
    /// Expiring within 30 days.
    Soon,
    /// Expiring within 90 days.
    Medium,
    /// Expiring within 180 days.
    Later,
    /// More than 180 days out, or no expiry date at all.
    Fresh,
}

/// Canonical category order used by the weighted selector.
pub const CATEGORY_ORDER: [ExpiryCategory; 5] = [
    ExpiryCategory::Expired,
    ExpiryCategory::Soon,
    ExpiryCategory::Medium,
    ExpiryCategory::Later,
    ExpiryCategory::Fresh,
];

impl ExpiryCategory {
    /// Classify a day count using inclusive thresholds.
    #[must_use]
    pub fn classify(days_until_expiry: i64) -> Self {
        if days_until_expiry <= 7 {
            Self::Expired
        } else if days_until_expiry <= 30 {
            Self::Soon
        } else if days_until_expiry <= 90 {
            Self::Medium
        } else if days_until_expiry <= 180 {
            Self::Later
        } else {
            Self::Fresh
        }
    }

    /// Classify an optional expiry date against a reference day.
    #[must_use]
    pub fn for_date(expiry: Option<NaiveDate>, today: NaiveDate) -> Self {
        Self::classify(days_until_expiry(expiry, today))
    }

    /// Banner label for the presentation layer.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Expired => "EXPIRED / EXPIRING SOON",
            Self::Soon => "EXPIRING WITHIN 1 MONTH",
            Self::Medium => "EXPIRING WITHIN 3 MONTHS",
            Self::Later => "EXPIRING WITHIN 6 MONTHS",
            Self::Fresh => "FRESH",
        }
    }
}

impl std::fmt::Display for ExpiryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Expired => "expired",
            Self::Soon => "soon",
            Self::Medium => "medium",
            Self::Later => "later",
            Self::Fresh => "fresh",
        };
        f.write_str(name)
    }
}

/// Whole days from `today` to the expiry date, at day granularity.
///
/// An absent expiry date returns `i64::MAX` (never expires).
#[must_use]
pub fn days_until_expiry(expiry: Option<NaiveDate>, today: NaiveDate) -> i64 {
    match expiry {
        Some(date) => (date - today).num_days(),
        None => i64::MAX,
    }
}
