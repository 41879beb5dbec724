//! Core product value types
//!
//! A `Tile` is the compact record pulled off a listing page; a
//! `ProductDraft` is the fully extracted and cleaned detail-page result; a
//! `CatalogRow` mirrors the columns the crawler reads back from the catalog.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Minimum data needed to decide whether a detail fetch is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub url: String,
    pub title: String,
    pub price: Option<f64>,
    pub available: bool,
}

/// Fully extracted product detail, cleaned and ready to persist.
#[derive(Debug, Clone, Default)]
pub struct ProductDraft {
    pub url: String,
    pub site: String,
    pub title: String,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub available: bool,
    pub currency: Option<String>,
    pub extracted_id: Option<String>,
    pub item_type: Option<String>,
    pub grade: Option<String>,
    pub conflict: Option<String>,
    pub nation: Option<String>,
    pub categories: Vec<String>,
    pub image_urls: Vec<String>,
    pub conflict_ai: Option<String>,
    pub nation_ai: Option<String>,
    pub item_type_ai: Option<String>,
    pub supergroup_ai: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// The catalog columns the detail updater compares against.
#[derive(Debug, Clone)]
pub struct CatalogRow {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub available: bool,
    pub date_sold: Option<DateTime<Utc>>,
    pub original_image_urls: Option<JsonValue>,
    pub s3_image_urls: Option<JsonValue>,
    pub price_history: Option<JsonValue>,
}

/// One snapshot entry: what the differ compares a tile against.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub title: String,
    pub price: Option<f64>,
    pub available: bool,
    pub description: Option<String>,
    pub price_history: JsonValue,
}

/// Per-pass, in-memory projection of catalog rows for one site. Built once
/// at the start of a scrape pass and discarded after.
pub type CatalogSnapshot = HashMap<String, SnapshotRow>;

/// Differ verdict for one tile (see the tile differ).
#[derive(Debug, Clone, PartialEq)]
pub enum TileClass {
    Unchanged,
    /// Only the availability flag differs from the catalog; a single UPDATE
    /// suffices and no detail fetch happens.
    AvailabilityOnly { available: bool },
    /// New URL, or title/price drifted: the detail page must be fetched.
    NeedsDetail,
}

/// Prices survive a parse/format round trip only to cent precision, so the
/// differ treats anything closer than half a cent as equal.
pub fn prices_equal(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => (a - b).abs() < 0.005,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_equal_tolerates_sub_cent_noise() {
        assert!(prices_equal(Some(12.0), Some(12.0)));
        assert!(prices_equal(Some(12.004), Some(12.0)));
        assert!(!prices_equal(Some(12.01), Some(12.0)));
        assert!(!prices_equal(Some(12.0), None));
        assert!(prices_equal(None, None));
    }
}
