//! Site profile configuration model
//!
//! A profile is the declarative description of one listing source: where its
//! catalog pages live, how to pull tiles and detail fields out of the HTML,
//! and which availability reconciliation mode applies. Profiles are plain
//! JSON files; several profiles may share a `source_name` (one listing page
//! per category) and are processed as one cohort.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// How the availability tracker reconciles this source with the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BulkAvailabilityMode {
    /// Walk listing pages; anything in the catalog but absent from the walk
    /// is a candidate for marking sold (guarded by safety gates).
    #[default]
    Tile,
    /// Stamp `last_seen` for every URL found, then expire stale rows. Meant
    /// for sites that remove sold items from their catalog entirely.
    LastSeen,
}

/// Pagination and transport settings for one profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    pub base_url: String,
    /// Path template containing a `{page}` placeholder, appended to
    /// `base_url` to form each catalog page URL.
    pub products_page_path: String,
    #[serde(default = "default_page_increment")]
    pub page_increment_step: u32,
    #[serde(default)]
    pub start_page: u32,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_page_increment() -> u32 {
    1
}

/// Selectors applied to each product tile on a listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileSelectors {
    /// Selects the tile elements themselves (must be a multi-result query).
    pub tiles: SelectorSpec,
    pub details_url: SelectorSpec,
    pub tile_title: SelectorSpec,
    #[serde(default)]
    pub tile_price: Option<SelectorSpec>,
    pub tile_availability: SelectorSpec,
    #[serde(default)]
    pub tile_unavailability_sold: Option<SelectorSpec>,
    #[serde(default)]
    pub tile_unavailability_reserved: Option<SelectorSpec>,
}

/// Selectors applied to a product detail page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailSelectors {
    pub details_title: SelectorSpec,
    #[serde(default)]
    pub details_description: Option<SelectorSpec>,
    #[serde(default)]
    pub details_price: Option<SelectorSpec>,
    pub details_availability: SelectorSpec,
    /// Always a `NamedFunction` pointing into the image extractor registry.
    #[serde(default)]
    pub details_image_url: Option<SelectorSpec>,
    #[serde(default)]
    pub details_conflict: Option<SelectorSpec>,
    #[serde(default)]
    pub details_nation: Option<SelectorSpec>,
    #[serde(default)]
    pub details_item_type: Option<SelectorSpec>,
    #[serde(default)]
    pub details_grade: Option<SelectorSpec>,
    #[serde(default)]
    pub details_extracted_id: Option<SelectorSpec>,
    #[serde(default)]
    pub details_categories: Option<SelectorSpec>,
}

/// One logical listing source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    pub source_name: String,
    /// Human-readable label shown in the site picker.
    pub json_desc: String,
    #[serde(default)]
    pub is_working: bool,
    /// When true the listing pages ARE the sold archive; absence from a
    /// listing carries no availability information for this source.
    #[serde(default)]
    pub is_sold_archive: bool,
    #[serde(default)]
    pub bulk_availability_mode: BulkAvailabilityMode,
    pub access_config: AccessConfig,
    pub product_tile_selectors: TileSelectors,
    pub product_details_selectors: DetailSelectors,
    #[serde(default)]
    pub currency: Option<String>,
    /// Per-product image upload parallelism. 1-2 for sensitive hosts.
    #[serde(default = "default_image_workers")]
    pub image_workers: usize,
    /// When the image extractor returns zero URLs, flag the product for
    /// review instead of silently storing nothing.
    #[serde(default)]
    pub attention_on_zero_images: bool,
    #[serde(default)]
    pub notes: String,
}

fn default_image_workers() -> usize {
    4
}

impl SiteProfile {
    /// Catalog page URL for the given page number.
    pub fn page_url(&self, page: u32) -> String {
        let path = self
            .access_config
            .products_page_path
            .replace("{page}", &page.to_string());
        format!("{}{}", self.access_config.base_url, path)
    }
}

/// A declarative extraction rule for one value.
///
/// Deserialized untagged: a bare bool/string is a constant, a map with a
/// `function` key dispatches into the image extractor registry, and anything
/// else is a DOM query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorSpec {
    Static(StaticValue),
    Named(NamedFunction),
    Query(DomQuery),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticValue {
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedFunction {
    pub function: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryMethod {
    #[default]
    Find,
    FindAll,
    Select,
    SelectOne,
    HasAttr,
}

/// A BeautifulSoup-idiom DOM query: method + positional args + keyword
/// filters, with an optional attribute to read off the matched element and a
/// post-processing pipeline for the extracted value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomQuery {
    #[serde(default)]
    pub method: QueryMethod,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, JsonValue>,
    #[serde(default)]
    pub attribute: Option<String>,
    /// For unavailability selectors: a bare match (element found) counts as
    /// a hit without reading any value.
    #[serde(default)]
    pub exists: bool,
    /// For `has_attr` class checks: the token that must be present.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub post_process: Vec<PostProcess>,
}

/// The closed post-processor registry. Adding a variant is a deliberate,
/// reviewed change; profiles can never reference anything outside this set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcess {
    Prepend(String),
    Append(String),
    SmartPrepend(String),
    Strip,
    StripHtmlTags,
    ReplaceAll(Vec<Replacement>),
    RemovePrefix(String),
    RemoveSuffix(String),
    Split(SplitSpec),
    Regex { pattern: String },
    Set(JsonValue),
    FindTextContains(FindTextContainsSpec),
    SubmethodExists(SubQuerySpec),
    ValidateStartswith(String),
    FromUrl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replacement {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSpec {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default)]
    pub take: TakeEnd,
}

fn default_delimiter() -> String {
    "-".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TakeEnd {
    #[default]
    First,
    Last,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindTextContainsSpec {
    pub value: String,
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
    #[serde(default = "json_true")]
    pub if_true: JsonValue,
    #[serde(default = "json_false")]
    pub if_false: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuerySpec {
    #[serde(default)]
    pub method: QueryMethod,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, JsonValue>,
    #[serde(default = "default_true")]
    pub expect: bool,
}

fn default_true() -> bool {
    true
}

fn json_true() -> JsonValue {
    JsonValue::Bool(true)
}

fn json_false() -> JsonValue {
    JsonValue::Bool(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_spec_parses_static_string() {
        let spec: SelectorSpec = serde_json::from_str("\"true\"").unwrap();
        match spec {
            SelectorSpec::Static(StaticValue::Text(s)) => assert_eq!(s, "true"),
            other => panic!("expected static text, got {other:?}"),
        }
    }

    #[test]
    fn selector_spec_parses_static_bool() {
        let spec: SelectorSpec = serde_json::from_str("true").unwrap();
        assert!(matches!(spec, SelectorSpec::Static(StaticValue::Bool(true))));
    }

    #[test]
    fn selector_spec_parses_named_function() {
        let spec: SelectorSpec =
            serde_json::from_str(r#"{"function": "woo_commerce"}"#).unwrap();
        match spec {
            SelectorSpec::Named(named) => assert_eq!(named.function, "woo_commerce"),
            other => panic!("expected named function, got {other:?}"),
        }
    }

    #[test]
    fn selector_spec_parses_dom_query_with_post_process() {
        let raw = r#"{
            "method": "find",
            "args": ["a"],
            "kwargs": {"class_": "product-link"},
            "attribute": "href",
            "post_process": [{"smart_prepend": "https://example.com"}, "strip"]
        }"#;
        let spec: SelectorSpec = serde_json::from_str(raw).unwrap();
        let SelectorSpec::Query(query) = spec else {
            panic!("expected dom query");
        };
        assert_eq!(query.method, QueryMethod::Find);
        assert_eq!(query.args, vec!["a".to_string()]);
        assert_eq!(query.attribute.as_deref(), Some("href"));
        assert_eq!(query.post_process.len(), 2);
        assert!(matches!(query.post_process[1], PostProcess::Strip));
    }

    #[test]
    fn profile_page_url_substitutes_page_number() {
        let profile: SiteProfile = serde_json::from_value(serde_json::json!({
            "source_name": "EXAMPLE_MILITARIA",
            "json_desc": "Example Militaria (shop)",
            "is_working": true,
            "access_config": {
                "base_url": "https://example-militaria.com/",
                "products_page_path": "shop/page/{page}/",
                "page_increment_step": 1
            },
            "product_tile_selectors": {
                "tiles": {"method": "find_all", "args": ["li"], "kwargs": {"class_": "product"}},
                "details_url": {"method": "find", "args": ["a"], "attribute": "href"},
                "tile_title": {"method": "find", "args": ["h2"]},
                "tile_availability": "true"
            },
            "product_details_selectors": {
                "details_title": {"method": "find", "args": ["h1"]},
                "details_availability": "true"
            }
        }))
        .unwrap();
        assert_eq!(
            profile.page_url(3),
            "https://example-militaria.com/shop/page/3/"
        );
        assert_eq!(profile.image_workers, 4);
        assert_eq!(profile.bulk_availability_mode, BulkAvailabilityMode::Tile);
    }
}
