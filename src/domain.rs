//! Domain module - core value types and per-site configuration

pub mod counters;
pub mod product;
pub mod site_profile;

pub use counters::PassCounters;
pub use product::{
    prices_equal, CatalogRow, CatalogSnapshot, ProductDraft, SnapshotRow, Tile, TileClass,
};
pub use site_profile::{
    AccessConfig, BulkAvailabilityMode, DetailSelectors, DomQuery, FindTextContainsSpec,
    NamedFunction, PostProcess, QueryMethod, Replacement, SelectorSpec, SiteProfile, SplitSpec,
    StaticValue, SubQuerySpec, TakeEnd, TileSelectors,
};
