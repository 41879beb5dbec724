//! Tile pipeline
//!
//! Walks a profile's catalog pages in order, extracting and validating the
//! product tiles on each page. Terminates on fetch failure, an empty page,
//! or a repeated page; the caller additionally halts it through the pass
//! counters when enough consecutive pages produced no catalog work.
//!
//! HTML parsing stays inside synchronous helpers so the parsed document
//! never crosses an await point.

use std::collections::{BTreeSet, HashSet};

use once_cell::sync::Lazy;
use scraper::Html;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::counters::PassCounters;
use crate::domain::product::Tile;
use crate::domain::site_profile::{
    DomQuery, QueryMethod, SelectorSpec, SiteProfile, StaticValue, TileSelectors,
};
use crate::extraction::cleaners;
use crate::extraction::selector_engine::{self, Value};
use crate::infrastructure::http_client::HttpClient;

/// Link targets that storefronts emit inside tiles but never identify a
/// product.
static CUSTOM_BAD_URLS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "https://militariaplaza.nl/archive-38/dirAsc/results,1-1",
        "https://militariaplaza.nl/archive-38/dirAsc",
        "https://www.therupturedduck.com/",
    ])
});

/// Detects the repeated-last-page pattern. A repeat observed before page 2
/// is tolerated (some sites pad their first pages); from page 2 on, a page
/// whose URL set exactly equals the previous page's ends the walk.
#[derive(Debug, Default)]
pub struct RepeatGuard {
    last: Option<BTreeSet<String>>,
    repeats: u32,
}

impl RepeatGuard {
    /// Returns true when pagination should terminate.
    pub fn observe(&mut self, page_urls: &BTreeSet<String>, current_page: u32) -> bool {
        let repeated = self.last.as_ref() == Some(page_urls);
        if repeated {
            self.repeats += 1;
            warn!(
                "Page {current_page} repeats the previous page's URL set ({} repeat(s))",
                self.repeats
            );
        } else {
            self.repeats = 0;
        }
        self.last = Some(page_urls.clone());
        repeated && current_page >= 2
    }
}

/// One page walk over a profile's catalog.
pub struct TilePipeline<'a> {
    profile: &'a SiteProfile,
    http: &'a HttpClient,
    cancel: CancellationToken,
    seen_urls: HashSet<String>,
    repeat_guard: RepeatGuard,
}

impl<'a> TilePipeline<'a> {
    pub fn new(profile: &'a SiteProfile, http: &'a HttpClient, cancel: CancellationToken) -> Self {
        Self {
            profile,
            http,
            cancel,
            seen_urls: HashSet::new(),
            repeat_guard: RepeatGuard::default(),
        }
    }

    /// Every URL yielded so far this pass.
    pub fn seen_urls(&self) -> &HashSet<String> {
        &self.seen_urls
    }

    /// Fetch and extract the next page of tiles. Returns `None` at
    /// end-of-catalog; the counters' continue flag is cleared as well.
    pub async fn next_page(&mut self, counters: &mut PassCounters) -> Option<Vec<Tile>> {
        if !counters.should_continue() || self.cancel.is_cancelled() {
            counters.halt();
            return None;
        }

        let page_number = counters.current_page;
        let page_url = self.profile.page_url(page_number);
        info!(
            "{}: fetching catalog page {} ({})",
            self.profile.source_name, page_number, page_url
        );

        let Some(page) = self.http.fetch_page_with_retries(&page_url, &self.cancel).await else {
            warn!(
                "{}: page fetch failed or empty, ending pagination at page {}",
                self.profile.source_name, page_number
            );
            counters.halt();
            return None;
        };

        let tiles = extract_tiles(&page.body, self.profile, &mut self.seen_urls);
        if tiles.is_empty() {
            info!(
                "{}: no valid tiles on page {}, ending pagination",
                self.profile.source_name, page_number
            );
            counters.halt();
            return None;
        }

        let page_urls: BTreeSet<String> = tiles.iter().map(|t| t.url.clone()).collect();
        if self.repeat_guard.observe(&page_urls, page_number) {
            warn!(
                "{}: page {} identical to previous page, ending pagination",
                self.profile.source_name, page_number
            );
            counters.halt();
            return None;
        }

        counters.total_seen += tiles.len();
        counters.advance_page(self.profile.access_config.page_increment_step);
        Some(tiles)
    }
}

/// Parse one listing page and produce its valid tiles, in document order.
///
/// A tile is valid when its URL is absolute http(s), is not the site's base
/// URL or a known bad link, its cleaned title is non-empty, and the URL has
/// not already been yielded this pass.
pub fn extract_tiles(
    body: &str,
    profile: &SiteProfile,
    seen_urls: &mut HashSet<String>,
) -> Vec<Tile> {
    let doc = Html::parse_document(body);
    let selectors = &profile.product_tile_selectors;

    let elements = match selector_engine::select_all(doc.root_element(), &selectors.tiles) {
        Ok(elements) => elements,
        Err(e) => {
            warn!("{}: tiles selector is malformed: {e}", profile.source_name);
            return Vec::new();
        }
    };

    let mut tiles = Vec::new();
    for element in elements {
        let Some(url) = extract_tile_url(element, profile) else {
            continue;
        };
        if seen_urls.contains(&url) {
            debug!("Skipping duplicate tile URL: {url}");
            continue;
        }

        let title = match selector_engine::extract(element, &selectors.tile_title, Some(&url)) {
            Ok(Some(value)) => cleaners::clean_title(&value.to_text()),
            _ => String::new(),
        };
        if title.is_empty() {
            debug!("Tile missing title: {url}");
            continue;
        }

        let price = selectors.tile_price.as_ref().and_then(|spec| {
            match selector_engine::extract(element, spec, Some(&url)) {
                Ok(Some(Value::Text(raw))) => cleaners::clean_price(&raw),
                _ => None,
            }
        });

        let available = resolve_tile_availability(element, selectors, &url, profile);

        seen_urls.insert(url.clone());
        debug!("TILE: {url} | title={title:?} | price={price:?} | available={available}");
        tiles.push(Tile { url, title, price, available });
    }
    tiles
}

fn extract_tile_url(element: scraper::ElementRef<'_>, profile: &SiteProfile) -> Option<String> {
    let selectors = &profile.product_tile_selectors;
    let raw = match selector_engine::extract(element, &selectors.details_url, None) {
        Ok(Some(Value::Text(raw))) => raw,
        Ok(_) => return None,
        Err(e) => {
            warn!("{}: details_url selector is malformed: {e}", profile.source_name);
            return None;
        }
    };

    let url = raw.trim();
    let base = profile.access_config.base_url.trim_end_matches('/');
    if url.is_empty()
        || url == "/"
        || url == "#"
        || url == "#MainContent"
        || url.trim_end_matches('/') == base
    {
        return None;
    }
    if CUSTOM_BAD_URLS.contains(url) {
        return None;
    }
    cleaners::clean_url(url).ok()
}

/// Three-stage availability policy: the configured selector first, then the
/// unavailability selectors, then the profile's static default.
fn resolve_tile_availability(
    element: scraper::ElementRef<'_>,
    selectors: &TileSelectors,
    url: &str,
    profile: &SiteProfile,
) -> bool {
    match selector_engine::extract(element, &selectors.tile_availability, Some(url)) {
        Ok(Some(Value::Bool(b))) => return b,
        Ok(Some(Value::Text(text))) => {
            if let Some(coerced) = cleaners::clean_available(&text) {
                return coerced;
            }
            if cleaners::available_from_element_text(&text) {
                return true;
            }
        }
        Ok(None) => {}
        Err(e) => warn!("{}: tile_availability selector error: {e}", profile.source_name),
    }

    if unavailability_hit(element, selectors.tile_unavailability_sold.as_ref())
        || unavailability_hit(element, selectors.tile_unavailability_reserved.as_ref())
    {
        return false;
    }

    if matches!(
        &selectors.tile_availability,
        SelectorSpec::Static(StaticValue::Text(text)) if text.eq_ignore_ascii_case("true")
    ) {
        return true;
    }
    warn!("{}: no availability signal for {url}, defaulting to unavailable", profile.source_name);
    false
}

fn unavailability_hit(element: scraper::ElementRef<'_>, spec: Option<&SelectorSpec>) -> bool {
    let Some(spec) = spec else {
        return false;
    };
    match spec {
        SelectorSpec::Static(StaticValue::Bool(b)) => *b,
        SelectorSpec::Static(StaticValue::Text(_)) | SelectorSpec::Named(_) => false,
        SelectorSpec::Query(query) => {
            if presence_only(query) {
                return selector_engine::query_matches(element, query).unwrap_or(false);
            }
            match selector_engine::extract(element, spec, None) {
                Ok(Some(Value::Bool(b))) => b,
                Ok(Some(Value::Text(text))) => cleaners::clean_available(&text) == Some(false),
                _ => false,
            }
        }
    }
}

/// Selectors that signal by mere presence: an `exists` flag, or a
/// `has_attr` class-token check.
fn presence_only(query: &DomQuery) -> bool {
    query.exists
        || query.kwargs.get("exists").and_then(|v| v.as_bool()).unwrap_or(false)
        || (query.method == QueryMethod::HasAttr && query.value.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_profile() -> SiteProfile {
        serde_json::from_value(serde_json::json!({
            "source_name": "EXAMPLE_MILITARIA",
            "json_desc": "Example Militaria (shop)",
            "is_working": true,
            "access_config": {
                "base_url": "https://example-militaria.com/",
                "products_page_path": "shop/page/{page}/"
            },
            "product_tile_selectors": {
                "tiles": {"method": "find_all", "args": ["li"], "kwargs": {"class_": "product"}},
                "details_url": {"method": "find", "args": ["a"], "attribute": "href",
                                "post_process": [{"smart_prepend": "https://example-militaria.com"}]},
                "tile_title": {"method": "find", "args": ["h2"]},
                "tile_price": {"method": "find", "args": ["span"], "kwargs": {"class_": "price"}},
                "tile_availability": {"method": "find", "args": ["span"], "kwargs": {"class_": "stock"}},
                "tile_unavailability_sold": {"method": "find", "args": ["span"],
                                             "kwargs": {"class_": "badge-sold"}, "exists": true}
            },
            "product_details_selectors": {
                "details_title": {"method": "find", "args": ["h1"]},
                "details_availability": "true"
            }
        }))
        .unwrap()
    }

    fn tile_html(url: &str, title: &str, price: &str, stock: &str) -> String {
        format!(
            r#"<li class="product"><a href="{url}"><h2>{title}</h2></a>
               <span class="price">{price}</span><span class="stock">{stock}</span></li>"#
        )
    }

    #[test]
    fn extracts_valid_tiles_in_document_order() {
        let profile = fixture_profile();
        let body = format!(
            "<ul>{}{}</ul>",
            tile_html("/shop/helmet", "M35 Helmet", "$1,250.00", "In stock"),
            tile_html("/shop/dagger", "Heer Dagger", "€ 89,50", "Sold"),
        );
        let mut seen = HashSet::new();
        let tiles = extract_tiles(&body, &profile, &mut seen);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].url, "https://example-militaria.com/shop/helmet");
        assert_eq!(tiles[0].title, "M35 Helmet");
        assert_eq!(tiles[0].price, Some(1250.0));
        assert!(tiles[0].available);
        assert_eq!(tiles[1].price, Some(89.5));
        assert!(!tiles[1].available);
    }

    // Property 4: no URL appears in more than one yielded tile per pass.
    #[test]
    fn dedup_spans_pages_within_a_pass() {
        let profile = fixture_profile();
        let body = format!(
            "<ul>{}{}</ul>",
            tile_html("/shop/helmet", "M35 Helmet", "$10", "In stock"),
            tile_html("/shop/helmet", "M35 Helmet again", "$10", "In stock"),
        );
        let mut seen = HashSet::new();
        let first_page = extract_tiles(&body, &profile, &mut seen);
        assert_eq!(first_page.len(), 1);
        let second_page = extract_tiles(&body, &profile, &mut seen);
        assert!(second_page.is_empty());
    }

    #[test]
    fn tiles_without_title_or_with_base_url_are_invalid() {
        let profile = fixture_profile();
        let body = format!(
            "<ul>{}{}{}</ul>",
            tile_html("https://example-militaria.com/", "Shop root", "$1", "In stock"),
            r#"<li class="product"><a href="/shop/no-title"><h2>  </h2></a></li>"#,
            tile_html("/shop/real", "Real item", "$5", "In stock"),
        );
        let mut seen = HashSet::new();
        let tiles = extract_tiles(&body, &profile, &mut seen);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].url, "https://example-militaria.com/shop/real");
    }

    #[test]
    fn unavailability_selector_forces_sold() {
        let profile = fixture_profile();
        let body = r#"<ul><li class="product">
            <a href="https://example-militaria.com/shop/x"><h2>Item</h2></a>
            <span class="badge-sold">reserved</span>
        </li></ul>"#;
        let mut seen = HashSet::new();
        let tiles = extract_tiles(body, &profile, &mut seen);
        assert_eq!(tiles.len(), 1);
        assert!(!tiles[0].available);
    }

    #[test]
    fn static_true_availability_defaults_to_available() {
        let mut profile = fixture_profile();
        profile.product_tile_selectors.tile_availability =
            serde_json::from_str("\"true\"").unwrap();
        profile.product_tile_selectors.tile_unavailability_sold = None;
        let body = r#"<ul><li class="product">
            <a href="https://example-militaria.com/shop/x"><h2>Item</h2></a>
        </li></ul>"#;
        let mut seen = HashSet::new();
        let tiles = extract_tiles(body, &profile, &mut seen);
        assert!(tiles[0].available);
    }

    #[test]
    fn missing_signals_default_to_unavailable() {
        let mut profile = fixture_profile();
        profile.product_tile_selectors.tile_unavailability_sold = None;
        let body = r#"<ul><li class="product">
            <a href="https://example-militaria.com/shop/x"><h2>Item</h2></a>
        </li></ul>"#;
        let mut seen = HashSet::new();
        let tiles = extract_tiles(body, &profile, &mut seen);
        assert!(!tiles[0].available);
    }

    // Property 10 / scenario S3: a repeat below page 2 is tolerated, an
    // identical page at page >= 2 terminates.
    #[test]
    fn repeat_guard_terminates_only_from_page_two() {
        let set: BTreeSet<String> =
            ["u1", "u2", "u3"].into_iter().map(String::from).collect();
        let mut guard = RepeatGuard::default();
        assert!(!guard.observe(&set, 0));
        assert!(!guard.observe(&set, 1));
        let mut guard = RepeatGuard::default();
        assert!(!guard.observe(&set, 2));
        assert!(guard.observe(&set, 3));
    }

    #[test]
    fn repeat_guard_resets_on_different_page() {
        let a: BTreeSet<String> = ["u1"].into_iter().map(String::from).collect();
        let b: BTreeSet<String> = ["u2"].into_iter().map(String::from).collect();
        let mut guard = RepeatGuard::default();
        assert!(!guard.observe(&a, 2));
        assert!(!guard.observe(&b, 3));
        assert!(guard.observe(&b, 4));
    }

    #[test]
    fn known_bad_urls_are_filtered() {
        let mut profile = fixture_profile();
        profile.access_config.base_url = "https://militariaplaza.nl/".to_string();
        let body = r#"<ul><li class="product">
            <a href="https://militariaplaza.nl/archive-38/dirAsc"><h2>Archive</h2></a>
        </li></ul>"#;
        let mut seen = HashSet::new();
        assert!(extract_tiles(body, &profile, &mut seen).is_empty());
    }
}
