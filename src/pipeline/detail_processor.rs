//! Detail processor
//!
//! The expensive half of the pipeline: fetch a product page, run the
//! profile's detail selectors and image extractor, clean every field, and
//! reconcile the result with the catalog row. New URLs insert; known URLs
//! update only the fields that actually changed.

use std::time::Duration;

use anyhow::Result;
use scraper::Html;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::product::{ProductDraft, Tile};
use crate::domain::site_profile::{SelectorSpec, SiteProfile};
use crate::enrichment::{apply_label_gates, embedding_text, Classifier, Embedder};
use crate::extraction::cleaners;
use crate::extraction::image_extractors;
use crate::extraction::selector_engine::{self, Value};
use crate::infrastructure::catalog::Catalog;
use crate::infrastructure::http_client::HttpClient;
use crate::pipeline::image_subsystem::ImageSubsystem;

/// What happened to one needs-detail tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailOutcome {
    Inserted,
    Updated,
    Unchanged,
    /// The page redirected to a different canonical URL; the original
    /// listing is treated as gone and marked unavailable.
    RedirectedSold,
    Unfetchable,
    /// Required field missing after cleaning; the product is skipped.
    Skipped,
}

/// Shared collaborators for one pass.
pub struct DetailContext<'a> {
    pub http: &'a HttpClient,
    pub catalog: &'a Catalog,
    pub images: &'a ImageSubsystem,
    pub classifier: Option<&'a dyn Classifier>,
    pub embedder: Option<&'a dyn Embedder>,
    pub sleep_range: (f64, f64),
    pub cancel: &'a CancellationToken,
}

/// Process one needs-detail tile end to end.
pub async fn process_tile(
    ctx: &DetailContext<'_>,
    profile: &SiteProfile,
    tile: &Tile,
) -> Result<DetailOutcome> {
    let Some(page) = ctx.http.fetch_page_with_retries(&tile.url, ctx.cancel).await else {
        warn!("{}: unfetchable product page {}", profile.source_name, tile.url);
        return Ok(DetailOutcome::Unfetchable);
    };

    if is_redirected_away(&tile.url, &page.final_url) {
        info!(
            "{}: {} redirected to {}; marking original unavailable",
            profile.source_name, tile.url, page.final_url
        );
        ctx.catalog
            .update_availability(&profile.source_name, &tile.url, false)
            .await?;
        return Ok(DetailOutcome::RedirectedSold);
    }

    let Some(extracted) = extract_detail(&page.body, profile, &tile.url) else {
        warn!("{}: no usable title on {}", profile.source_name, tile.url);
        return Ok(DetailOutcome::Skipped);
    };
    let mut draft = extracted.draft;

    if extracted.ran_image_extractor
        && draft.image_urls.is_empty()
        && profile.attention_on_zero_images
    {
        warn!("{}: zero images extracted for {}", profile.source_name, tile.url);
        ctx.catalog
            .mark_requires_attention(&profile.source_name, &tile.url)
            .await?;
    }

    enrich(ctx, &mut draft).await;

    if ctx.cancel.is_cancelled() {
        return Ok(DetailOutcome::Skipped);
    }

    let outcome = match ctx.catalog.fetch_row(&profile.source_name, &tile.url).await? {
        None => {
            let product_id = ctx.catalog.insert_product(&draft).await?;
            upload_images(ctx, profile, product_id, &draft, true).await;
            DetailOutcome::Inserted
        }
        Some(row) => {
            let product_id = row.id;
            let update = ctx.catalog.apply_detail_update(&row, &draft).await?;
            upload_images(ctx, profile, product_id, &draft, false).await;
            if update.changed {
                DetailOutcome::Updated
            } else {
                DetailOutcome::Unchanged
            }
        }
    };

    politeness_sleep(ctx).await;
    Ok(outcome)
}

async fn upload_images(
    ctx: &DetailContext<'_>,
    profile: &SiteProfile,
    product_id: i64,
    draft: &ProductDraft,
    is_new: bool,
) {
    if draft.image_urls.is_empty() {
        return;
    }
    if !is_new {
        match ctx
            .catalog
            .should_skip_image_upload(&profile.source_name, &draft.url)
            .await
        {
            Ok(true) => {
                debug!("Imagery already complete for {}", draft.url);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Image-skip check failed for {}: {e}", draft.url);
                return;
            }
        }
    }
    if let Err(e) = ctx
        .images
        .process_product(
            product_id,
            &profile.source_name,
            &draft.url,
            &draft.image_urls,
            profile.image_workers,
        )
        .await
    {
        warn!("Image subsystem failed for {}: {e}", draft.url);
    }
}

async fn enrich(ctx: &DetailContext<'_>, draft: &mut ProductDraft) {
    if let Some(classifier) = ctx.classifier {
        let description = draft.description.clone().unwrap_or_default();
        match classifier
            .classify(&draft.title, &description, draft.image_urls.first().map(String::as_str))
            .await
        {
            Ok(classification) => {
                let gated = apply_label_gates(classification);
                draft.conflict_ai = gated.conflict;
                draft.nation_ai = gated.nation;
                draft.item_type_ai = gated.item_type;
                draft.supergroup_ai = gated.supergroup;
            }
            Err(e) => warn!("Classifier failed for {}: {e}", draft.url),
        }
    }
    if let Some(embedder) = ctx.embedder {
        let text = embedding_text(&draft.title, draft.description.as_deref());
        match embedder.embed(&text).await {
            Ok(vector) => draft.embedding = Some(vector),
            Err(e) => warn!("Embedder failed for {}: {e}", draft.url),
        }
    }
}

async fn politeness_sleep(ctx: &DetailContext<'_>) {
    let (min, max) = ctx.sleep_range;
    let span = (max - min).max(0.0);
    let secs = min + fastrand::f64() * span;
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => {},
        _ = ctx.cancel.cancelled() => {},
    }
}

/// Did the server silently move us off the requested listing?
pub fn is_redirected_away(requested: &str, final_url: &str) -> bool {
    fn normalized(raw: &str) -> Option<(String, String)> {
        let parsed = Url::parse(raw).ok()?;
        Some((
            parsed.host_str().unwrap_or_default().to_lowercase(),
            parsed.path().trim_end_matches('/').to_string(),
        ))
    }
    match (normalized(requested), normalized(final_url)) {
        (Some(a), Some(b)) => a != b,
        _ => requested.trim_end_matches('/') != final_url.trim_end_matches('/'),
    }
}

pub struct ExtractedDetail {
    pub draft: ProductDraft,
    pub ran_image_extractor: bool,
}

/// Parse a product page and produce the cleaned draft. `None` when the
/// required title is missing after cleaning.
pub fn extract_detail(body: &str, profile: &SiteProfile, url: &str) -> Option<ExtractedDetail> {
    let doc = Html::parse_document(body);
    let root = doc.root_element();
    let selectors = &profile.product_details_selectors;

    let text_of = |spec: &SelectorSpec| -> Option<String> {
        match selector_engine::extract(root, spec, Some(url)) {
            Ok(Some(value)) => Some(value.to_text()),
            Ok(None) => None,
            Err(e) => {
                warn!("{}: detail selector error: {e}", profile.source_name);
                None
            }
        }
    };

    let title = match selector_engine::extract(root, &selectors.details_title, Some(url)) {
        Ok(Some(value)) => cleaners::clean_title_strict(&value.to_text()).ok()?,
        _ => return None,
    };

    let description = selectors
        .details_description
        .as_ref()
        .and_then(|spec| text_of(spec))
        .map(|raw| cleaners::clean_description(&raw))
        .filter(|cleaned| !cleaned.is_empty());

    let price = selectors
        .details_price
        .as_ref()
        .and_then(|spec| text_of(spec))
        .and_then(|raw| cleaners::clean_price(&raw));

    let available = match selector_engine::extract(root, &selectors.details_availability, Some(url))
    {
        Ok(Some(Value::Bool(b))) => b,
        Ok(Some(Value::Text(text))) => cleaners::clean_available(&text)
            .unwrap_or_else(|| cleaners::available_from_element_text(&text)),
        _ => false,
    };

    let (image_urls, ran_image_extractor) = match &selectors.details_image_url {
        Some(SelectorSpec::Named(named)) => match image_extractors::lookup(&named.function) {
            Some(extractor) => {
                let raw = extractor(&doc);
                match cleaners::clean_url_list(&raw) {
                    Ok(cleaned) => (cleaned, true),
                    Err(e) => {
                        warn!("{}: bad image URL list for {url}: {e}", profile.source_name);
                        (Vec::new(), true)
                    }
                }
            }
            None => {
                warn!(
                    "{}: unknown image extractor '{}'",
                    profile.source_name, named.function
                );
                (Vec::new(), false)
            }
        },
        Some(_) | None => (Vec::new(), false),
    };

    let draft = ProductDraft {
        url: url.to_string(),
        site: profile.source_name.clone(),
        title,
        description,
        price,
        available,
        currency: profile.currency.clone(),
        extracted_id: selectors
            .details_extracted_id
            .as_ref()
            .and_then(|spec| text_of(spec))
            .and_then(|raw| cleaners::clean_extracted_id(&raw)),
        item_type: selectors
            .details_item_type
            .as_ref()
            .and_then(|spec| text_of(spec))
            .and_then(|raw| cleaners::clean_item_type(&raw)),
        grade: selectors
            .details_grade
            .as_ref()
            .and_then(|spec| text_of(spec))
            .and_then(|raw| cleaners::clean_grade(&raw)),
        conflict: selectors
            .details_conflict
            .as_ref()
            .and_then(|spec| text_of(spec))
            .and_then(|raw| cleaners::clean_conflict(&raw)),
        nation: selectors
            .details_nation
            .as_ref()
            .and_then(|spec| text_of(spec))
            .and_then(|raw| cleaners::clean_nation(&raw)),
        categories: selectors
            .details_categories
            .as_ref()
            .and_then(|spec| text_of(spec))
            .map(|raw| {
                cleaners::clean_categories(
                    &raw.split(',').map(str::to_string).collect::<Vec<_>>(),
                )
            })
            .unwrap_or_default(),
        image_urls,
        ..ProductDraft::default()
    };

    Some(ExtractedDetail { draft, ran_image_extractor })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail_profile() -> SiteProfile {
        serde_json::from_value(serde_json::json!({
            "source_name": "EXAMPLE_MILITARIA",
            "json_desc": "Example Militaria (shop)",
            "is_working": true,
            "currency": "USD",
            "access_config": {
                "base_url": "https://example-militaria.com/",
                "products_page_path": "shop/page/{page}/"
            },
            "product_tile_selectors": {
                "tiles": {"method": "find_all", "args": ["li"]},
                "details_url": {"method": "find", "args": ["a"], "attribute": "href"},
                "tile_title": {"method": "find", "args": ["h2"]},
                "tile_availability": "true"
            },
            "product_details_selectors": {
                "details_title": {"method": "find", "args": ["h1"], "kwargs": {"class_": "product_title"}},
                "details_description": {"method": "find", "args": ["div"], "kwargs": {"class_": "summary"}},
                "details_price": {"method": "find", "args": ["span"], "kwargs": {"class_": "amount"}},
                "details_availability": {"method": "find", "args": ["p"], "kwargs": {"class_": "stock"}},
                "details_item_type": {"method": "find", "args": ["span"], "kwargs": {"class_": "posted_in"}},
                "details_image_url": {"function": "woo_commerce"}
            }
        }))
        .unwrap()
    }

    // Scenario S1 page shape: one product with description and gallery.
    #[test]
    fn extract_detail_builds_a_cleaned_draft() {
        let profile = detail_profile();
        let body = r#"
            <h1 class="product_title">  M35 &quot;Double Decal&quot; Helmet </h1>
            <div class="summary">Description: An  M35 shell : </div>
            <span class="amount">$1,250.00</span>
            <p class="stock">In stock</p>
            <span class="posted_in">Categories: Helmets - M35</span>
            <div class="woocommerce-product-gallery__image" data-large_image="https://x.com/1.jpg"></div>
            <div class="woocommerce-product-gallery__image" data-large_image="https://x.com/2.jpg"></div>
        "#;
        let extracted =
            extract_detail(body, &profile, "https://example-militaria.com/shop/helmet").unwrap();
        let draft = extracted.draft;
        assert_eq!(draft.title, "M35 'Double Decal' Helmet");
        assert_eq!(draft.description.as_deref(), Some("An M35 shell"));
        assert_eq!(draft.price, Some(1250.0));
        assert!(draft.available);
        assert_eq!(draft.item_type.as_deref(), Some("M35"));
        assert_eq!(draft.image_urls, vec!["https://x.com/1.jpg", "https://x.com/2.jpg"]);
        assert!(extracted.ran_image_extractor);
        assert_eq!(draft.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn extract_detail_requires_a_title() {
        let profile = detail_profile();
        let body = "<p class=\"stock\">In stock</p>";
        assert!(extract_detail(body, &profile, "https://example-militaria.com/x").is_none());
    }

    #[test]
    fn missing_availability_signal_reads_as_sold() {
        let profile = detail_profile();
        let body = r#"<h1 class="product_title">Helmet</h1>"#;
        let extracted =
            extract_detail(body, &profile, "https://example-militaria.com/x").unwrap();
        assert!(!extracted.draft.available);
    }

    // Property 11: a redirect to the site root is a removal signal for the
    // original URL.
    #[test]
    fn redirect_detection_normalizes_paths() {
        assert!(is_redirected_away(
            "https://x.com/product/foo",
            "https://x.com/"
        ));
        assert!(!is_redirected_away(
            "https://x.com/product/foo",
            "https://x.com/product/foo/"
        ));
        assert!(!is_redirected_away(
            "http://x.com/product/foo",
            "https://x.com/product/foo"
        ));
        assert!(is_redirected_away(
            "https://x.com/product/foo",
            "https://x.com/product/bar"
        ));
    }
}
