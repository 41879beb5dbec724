//! Tile differ
//!
//! Decides, per tile, whether the catalog already has everything it needs.
//! The detail page is the expensive fetch; tile data settles the common
//! cases (no-op, or a bare availability flip) without it.

use crate::domain::product::{prices_equal, CatalogSnapshot, Tile, TileClass};

/// Classify one tile against the pass snapshot.
pub fn classify(tile: &Tile, snapshot: &CatalogSnapshot) -> TileClass {
    let Some(row) = snapshot.get(&tile.url) else {
        return TileClass::NeedsDetail;
    };
    if row.title == tile.title && prices_equal(row.price, tile.price) {
        if row.available != tile.available {
            TileClass::AvailabilityOnly { available: tile.available }
        } else {
            TileClass::Unchanged
        }
    } else {
        TileClass::NeedsDetail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::SnapshotRow;
    use serde_json::json;

    fn snapshot_with(url: &str, title: &str, price: Option<f64>, available: bool) -> CatalogSnapshot {
        let mut snapshot = CatalogSnapshot::new();
        snapshot.insert(
            url.to_string(),
            SnapshotRow {
                title: title.to_string(),
                price,
                available,
                description: Some("desc".to_string()),
                price_history: json!([]),
            },
        );
        snapshot
    }

    fn tile(url: &str, title: &str, price: Option<f64>, available: bool) -> Tile {
        Tile { url: url.to_string(), title: title.to_string(), price, available }
    }

    #[test]
    fn unknown_url_needs_detail() {
        let snapshot = CatalogSnapshot::new();
        let t = tile("https://x/1", "Helmet", Some(12.0), true);
        assert_eq!(classify(&t, &snapshot), TileClass::NeedsDetail);
    }

    // Scenario S2: same title and price, availability flipped: one UPDATE,
    // no detail fetch.
    #[test]
    fn availability_flip_is_update_only() {
        let snapshot = snapshot_with("https://x/1", "Helmet", Some(12.0), true);
        let t = tile("https://x/1", "Helmet", Some(12.0), false);
        assert_eq!(
            classify(&t, &snapshot),
            TileClass::AvailabilityOnly { available: false }
        );
    }

    #[test]
    fn exact_match_is_unchanged() {
        let snapshot = snapshot_with("https://x/1", "Helmet", Some(12.0), true);
        let t = tile("https://x/1", "Helmet", Some(12.0), true);
        assert_eq!(classify(&t, &snapshot), TileClass::Unchanged);
    }

    #[test]
    fn title_or_price_drift_needs_detail() {
        let snapshot = snapshot_with("https://x/1", "Helmet", Some(12.0), true);
        let renamed = tile("https://x/1", "Helmet M35", Some(12.0), true);
        assert_eq!(classify(&renamed, &snapshot), TileClass::NeedsDetail);
        let repriced = tile("https://x/1", "Helmet", Some(15.0), true);
        assert_eq!(classify(&repriced, &snapshot), TileClass::NeedsDetail);
        let priceless = tile("https://x/1", "Helmet", None, true);
        assert_eq!(classify(&priceless, &snapshot), TileClass::NeedsDetail);
    }
}
