//! Per-site-family image extractors
//!
//! A registry of named functions, each encoding one storefront family's
//! gallery idiom: WooCommerce `data-large_image` attributes, VirtueMart
//! `rel="vm-additional-images"` anchors, Wix media wrappers, JSON-LD image
//! fields, inline script globs. Profiles reference an entry by name through
//! a `NamedFunction` selector; the core never loads code at runtime.
//!
//! Contract per extractor: output preserves gallery order, duplicates and
//! thumbnail variants are removed, URLs are absolute, and total failure is
//! an empty list, never a panic.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value as JsonValue;
use tracing::warn;

pub type ImageExtractorFn = fn(&Html) -> Vec<String>;

/// Resolve an extractor by the profile's `function` name.
pub fn lookup(name: &str) -> Option<ImageExtractorFn> {
    let function: ImageExtractorFn = match name {
        "woo_commerce" => woo_commerce,
        "woo_commerce2" => woo_commerce2,
        "concept500" | "concept500_2" => concept500,
        "concept500_basmilitaria" => concept500_basmilitaria,
        "ea_militaria" => ea_militaria,
        "rg_militaria" => rg_militaria,
        "militaria_plaza" => militaria_plaza,
        "circa1941" => circa1941,
        "frontkampfer45" => frontkampfer45,
        "the_war_front" => the_war_front,
        "wars_end_shop" => wars_end_shop,
        "the_ruptured_duck" => the_ruptured_duck,
        "virtual_grenadier" => virtual_grenadier,
        "tarnmilitaria" => tarnmilitaria,
        "eagle_relics" => eagle_relics,
        "stewarts_militaria" => stewarts_militaria,
        "militaria_1944" => militaria_1944,
        "ss_steel_inc" => ss_steel_inc,
        "bunker_militaria" => bunker_militaria,
        "collectors_guild" => collectors_guild,
        "axis_militaria" => axis_militaria,
        _ => return None,
    };
    Some(function)
}

fn css(selector: &'static str) -> Selector {
    Selector::parse(selector).expect("static selector is valid CSS")
}

fn attr_values(doc: &Html, selector: &'static str, attr: &str) -> Vec<String> {
    doc.select(&css(selector))
        .filter_map(|el| el.value().attr(attr))
        .map(str::to_string)
        .collect()
}

/// Fix protocol-relative URLs the way the storefronts emit them.
fn with_scheme(url: String) -> String {
    if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        url
    }
}

fn dedupe(urls: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

/// WooCommerce galleries: `data-large_image` first, anchor hrefs as fallback.
pub fn woo_commerce(doc: &Html) -> Vec<String> {
    let large = attr_values(doc, "div.woocommerce-product-gallery__image", "data-large_image");
    if !large.is_empty() {
        return large;
    }
    attr_values(doc, "div.woocommerce-product-gallery__image a", "href")
}

/// WooCommerce-like vertical zoom galleries: `data-zoom` with href fallback.
pub fn woo_commerce2(doc: &Html) -> Vec<String> {
    let zoom = attr_values(doc, "div.product.item-image.imgzoom", "data-zoom");
    let urls = if zoom.is_empty() {
        attr_values(doc, "div.product.item-image.imgzoom a", "href")
    } else {
        zoom
    };
    urls.into_iter().filter(|u| u.starts_with("http")).collect()
}

/// Block-image layouts; relative hrefs resolve against `<base>` or the
/// canonical link.
pub fn concept500(doc: &Html) -> Vec<String> {
    let urls = attr_values(doc, "div.content-part.block-image a", "href");
    if urls.is_empty() || urls[0].starts_with("http") {
        return urls;
    }
    let base = doc
        .select(&css("base"))
        .next()
        .and_then(|el| el.value().attr("href"))
        .or_else(|| {
            doc.select(&css("link[rel=\"canonical\"]"))
                .next()
                .and_then(|el| el.value().attr("href"))
        })
        .map(|href| href.trim_end_matches('/').to_string());
    let Some(base) = base else {
        return Vec::new();
    };
    urls.into_iter()
        .map(|u| {
            if u.starts_with("http") {
                u
            } else {
                format!("{base}/{}", u.trim_start_matches('/'))
            }
        })
        .collect()
}

pub fn concept500_basmilitaria(doc: &Html) -> Vec<String> {
    attr_values(doc, "div.carousel-inner img", "src")
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| u.starts_with("http"))
        .collect()
}

pub fn ea_militaria(doc: &Html) -> Vec<String> {
    attr_values(doc, "div.product.item-image.imgzoom", "data-zoom")
}

pub fn rg_militaria(doc: &Html) -> Vec<String> {
    attr_values(doc, "a.image-gallery__slide-item", "href")
}

/// VirtueMart galleries tag full-size images with rel="vm-additional-images".
pub fn militaria_plaza(doc: &Html) -> Vec<String> {
    attr_values(doc, "a[rel=\"vm-additional-images\"]", "href")
}

/// Wix storefronts put the full-size URL on the media wrapper's href.
fn wix_media_gallery(doc: &Html) -> Vec<String> {
    attr_values(
        doc,
        "[data-hook=\"main-media-image-wrapper\"] div.media-wrapper-hook",
        "href",
    )
    .into_iter()
    .map(with_scheme)
    .collect()
}

pub fn circa1941(doc: &Html) -> Vec<String> {
    wix_media_gallery(doc)
}

pub fn frontkampfer45(doc: &Html) -> Vec<String> {
    wix_media_gallery(doc)
}

pub fn the_war_front(doc: &Html) -> Vec<String> {
    wix_media_gallery(doc)
}

pub fn wars_end_shop(doc: &Html) -> Vec<String> {
    attr_values(doc, "#product-photo-container a.gallery", "href")
        .into_iter()
        .map(with_scheme)
        .collect()
}

pub fn the_ruptured_duck(doc: &Html) -> Vec<String> {
    attr_values(doc, ".product-single__thumbnail-item a", "href")
        .into_iter()
        .map(with_scheme)
        .collect()
}

/// Main album image first, then the detail shots, resolved to the shop host.
pub fn virtual_grenadier(doc: &Html) -> Vec<String> {
    let mut urls = Vec::new();
    if let Some(main) = doc
        .select(&css("a.album-main"))
        .next()
        .and_then(|el| el.value().attr("href"))
    {
        urls.push(main.to_string());
    }
    urls.extend(attr_values(doc, "a.album", "href"));
    urls.into_iter()
        .map(|u| {
            if u.starts_with("http") {
                u
            } else {
                format!("https://www.virtualgrenadier.com/{}", u.trim_start_matches('/'))
            }
        })
        .collect()
}

pub fn tarnmilitaria(doc: &Html) -> Vec<String> {
    attr_values(doc, "div.gallery-thumb a", "href")
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| u.starts_with("/uploads/") || u.starts_with("http"))
        .map(|u| {
            if u.starts_with('/') {
                format!("https://tarnmilitaria.com{u}")
            } else {
                u
            }
        })
        .collect()
}

pub fn eagle_relics(doc: &Html) -> Vec<String> {
    attr_values(doc, "div#product-slides div.item-slide a", "href")
}

/// Stewarts serves originals and thumbnails from the same host; keep only
/// the originals.
pub fn stewarts_militaria(doc: &Html) -> Vec<String> {
    attr_values(doc, "img[src^=\"https://stewartsmilitaryantiques.com/img/\"]", "src")
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| {
            !u.contains("thumb") && !u.contains("small") && !u.contains("icons/help.png")
        })
        .collect()
}

/// 1944militaria publishes the gallery in JSON-LD; the `image` field may be
/// a numerically keyed map, a list, or a single URL.
pub fn militaria_1944(doc: &Html) -> Vec<String> {
    let Some(script) = doc
        .select(&css("script[type=\"application/ld+json\"]"))
        .next()
    else {
        return Vec::new();
    };
    let raw = script.text().collect::<String>();
    let parsed: JsonValue = match serde_json::from_str(raw.trim()) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("militaria_1944: JSON-LD did not parse: {e}");
            return Vec::new();
        }
    };
    match parsed.get("image") {
        Some(JsonValue::Object(map)) => {
            let mut keyed: Vec<(i64, String)> = map
                .iter()
                .filter_map(|(k, v)| {
                    Some((k.parse::<i64>().ok()?, v.as_str()?.to_string()))
                })
                .collect();
            keyed.sort_by_key(|(k, _)| *k);
            keyed.into_iter().map(|(_, url)| url).collect()
        }
        Some(JsonValue::Array(list)) => list
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(JsonValue::String(url)) => vec![url.clone()],
        _ => Vec::new(),
    }
}

static RESOLUTION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)-\d+x\d+(\.(?:jpg|jpeg|png|webp))$").unwrap());

/// Upload-dir images with the `-WxH` thumbnail suffix stripped back to the
/// base file, first occurrence wins.
pub fn ss_steel_inc(doc: &Html) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();
    for src in attr_values(doc, "img", "src") {
        if !src.contains("/uploads/") {
            continue;
        }
        let base = src.split('?').next().unwrap_or(&src);
        let clean = RESOLUTION_SUFFIX.replace(base, "$1").to_string();
        let lowered = clean.to_lowercase();
        if !(lowered.ends_with(".jpg")
            || lowered.ends_with(".jpeg")
            || lowered.ends_with(".png")
            || lowered.ends_with(".webp"))
        {
            continue;
        }
        if seen.insert(clean.clone()) {
            urls.push(clean);
        }
    }
    urls
}

static MIVA_GRAPHIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""graphics\\?/[^"]+\.jpg""#).unwrap());
static MIVA_SIZE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"_\d+x\d+\.jpg$").unwrap());

/// Miva storefront: gallery paths live inside an inline `image_data` script.
/// Thumbnail renditions carry `_WxH` suffixes; one entry per base image.
pub fn bunker_militaria(doc: &Html) -> Vec<String> {
    let base_url = "https://www.bunkermilitaria.com/Merchant2/";
    let mut seen_bases = std::collections::HashSet::new();
    let mut urls = Vec::new();
    for script in doc.select(&css("script")) {
        let text = script.text().collect::<String>();
        if !text.contains("image_data") {
            continue;
        }
        for raw in MIVA_GRAPHIC.find_iter(&text) {
            let cleaned = raw.as_str().trim_matches('"').replace("\\/", "/");
            if cleaned.contains("_64x48") || cleaned.contains("_48x64") {
                continue;
            }
            let base_key = MIVA_SIZE_SUFFIX.replace(&cleaned, ".jpg").to_string();
            if seen_bases.insert(base_key) {
                urls.push(format!("{base_url}{cleaned}"));
            }
        }
    }
    urls
}

/// Relative `.jpg` sources resolved against the fixed photo directory.
pub fn collectors_guild(doc: &Html) -> Vec<String> {
    attr_values(doc, "img", "src")
        .into_iter()
        .filter(|src| src.to_lowercase().ends_with(".jpg") && !src.starts_with("http"))
        .map(|src| format!("https://www.germanmilitaria.com/Heer/photos/{src}"))
        .collect()
}

pub fn axis_militaria(doc: &Html) -> Vec<String> {
    let urls = attr_values(doc, "div.woocommerce-product-gallery img", "src")
        .into_iter()
        .filter(|src| !src.to_lowercase().contains("placeholder"))
        .collect();
    dedupe(urls)
}
