//! Field cleaners
//!
//! Pure, total functions that turn raw extracted strings into typed catalog
//! fields. No I/O. Required fields (URL, title in strict mode) reject bad
//! input with a typed error; everything else degrades to `None`.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static ABSOLUTE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?://)([a-zA-Z0-9.-]+)(\.[a-zA-Z]{2,})(:[0-9]+)?(/.*)?$").unwrap()
});
static THOUSANDS_SHORTHAND: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d{3}$").unwrap());
static PARENTHESIZED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^)]+)\)").unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CleanError {
    #[error("URL is empty after cleaning")]
    EmptyUrl,
    #[error("URL is not absolute http(s): {0}")]
    NotAbsolute(String),
    #[error("title is empty after cleaning")]
    EmptyTitle,
    #[error("invalid image URL in list: {0}")]
    InvalidImageUrl(String),
}

/// Accept only trimmed, absolute `http(s)` URLs.
pub fn clean_url(raw: &str) -> Result<String, CleanError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(CleanError::EmptyUrl);
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(CleanError::NotAbsolute(url.to_string()));
    }
    Ok(url.to_string())
}

/// Decode entities, drop tags, normalize quotes, collapse whitespace.
/// Permissive: an empty result comes back as `""`.
pub fn clean_title(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    let stripped = HTML_TAG.replace_all(&decoded, "");
    let quoted = normalize_quotes(stripped.trim());
    collapse_whitespace(&quoted)
}

/// Strict variant used where an empty title must fail the tile/product.
pub fn clean_title_strict(raw: &str) -> Result<String, CleanError> {
    let title = clean_title(raw);
    if title.is_empty() {
        return Err(CleanError::EmptyTitle);
    }
    Ok(title)
}

/// As title, plus: drop a leading literal `Description`, trim stray colons.
pub fn clean_description(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    let mut text = decoded.trim().to_string();
    let label_len = "description".len();
    if text
        .get(..label_len)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("description"))
    {
        text = text[label_len..].trim().to_string();
    }
    let quoted = normalize_quotes(&text);
    let collapsed = collapse_whitespace(&quoted);
    collapsed.trim_matches(':').trim().to_string()
}

/// Heuristic numeric parse over mixed European/US price formats.
///
/// When both `.` and `,` appear, the rightmost is the decimal separator and
/// the other is thousands. A lone `.` with exactly three trailing digits is
/// thousands shorthand. A lone `,` is the decimal separator. Multiple `.`
/// with no `,` collapse to the last one.
pub fn clean_price(raw: &str) -> Option<f64> {
    let mut text = HTML_TAG.replace_all(raw, "").trim().to_string();
    let had_comma = text.contains(',');

    if text.contains('.') && text.contains(',') {
        let last_dot = text.rfind('.').unwrap_or(0);
        let last_comma = text.rfind(',').unwrap_or(0);
        if last_comma > last_dot {
            // European: dots are thousands, comma is the decimal point.
            text = text.replace('.', "");
        } else {
            // US: commas are thousands.
            text = text.replace(',', "");
        }
    } else if !had_comma {
        let digits_only: String = text.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
        if THOUSANDS_SHORTHAND.is_match(&digits_only) {
            text = text.replace('.', "");
        }
    }

    if text.contains(',') && !text.contains('.') {
        text = text.replace(',', ".");
    }

    if text.matches('.').count() > 1 && !had_comma {
        let parts: Vec<&str> = text.split('.').collect();
        if let Some((last, rest)) = parts.split_last() {
            text = format!("{}.{last}", rest.concat());
        }
    }

    let numeric: String = text.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    let price: f64 = numeric.parse().ok()?;
    (price >= 0.0).then_some(price)
}

/// Boolean coercion with the closed synonym set. Returns `None` for strings
/// outside the set so the caller can fall through to weaker signals.
pub fn clean_available(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "in stock" | "available" | "1" | "1 in stock" | "stock in-stock" => {
            Some(true)
        }
        "false" | "no" | "sold" | "unavailable" | "out of stock" | "0" | "sold out" => Some(false),
        _ => None,
    }
}

/// Element-level fallback: treat as available when the text advertises
/// stock or a buy action.
pub fn available_from_element_text(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("in stock") || lowered.contains("add to cart")
}

/// Validate every entry; a single bad URL fails the whole list.
pub fn clean_url_list(urls: &[String]) -> Result<Vec<String>, CleanError> {
    let mut cleaned = Vec::with_capacity(urls.len());
    for url in urls {
        let trimmed = url.trim();
        if !ABSOLUTE_URL.is_match(trimmed) {
            return Err(CleanError::InvalidImageUrl(trimmed.to_string()));
        }
        cleaned.push(trimmed.to_string());
    }
    Ok(cleaned)
}

pub fn clean_nation(raw: &str) -> Option<String> {
    let nation = raw.trim();
    (!nation.is_empty()).then(|| nation.to_uppercase())
}

pub fn clean_conflict(raw: &str) -> Option<String> {
    let conflict = raw.trim();
    (!conflict.is_empty()).then(|| conflict.to_uppercase())
}

pub fn clean_grade(raw: &str) -> Option<String> {
    let grade = raw.trim();
    (!grade.is_empty()).then(|| title_case(grade))
}

/// Item-type sanitation: drop listing-page prefixes and filler words, pull
/// the payload out of trailing parentheses and hyphenated paths.
pub fn clean_item_type(raw: &str) -> Option<String> {
    let decoded = html_escape::decode_html_entities(raw);
    let mut text = decoded.trim().to_uppercase();
    if text.is_empty() {
        return None;
    }

    for prefix in ["CATEGORIES:", "CATEGORY:", "ARCHIVE:"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim().to_string();
        }
    }

    let mut parts = Vec::new();
    for raw_part in text.split(',') {
        let mut part = raw_part.trim().to_string();
        if part.is_empty() || part == "NEW" || part == "SOLD" {
            continue;
        }
        if let Some(stripped) = part.strip_suffix("(RELATED)") {
            part = stripped.trim().to_string();
        }
        if let Some(inner) = PARENTHESIZED
            .captures_iter(&part)
            .last()
            .and_then(|caps| caps.get(1))
        {
            part = inner.as_str().trim().to_string();
        }
        if let Some((_, tail)) = part.rsplit_once('-') {
            part = tail.trim().to_string();
        }
        if matches!(part.as_str(), "SOLD" | "NOT SPECIFIED" | "ARCHIVE" | "MILITARIA" | "") {
            continue;
        }
        parts.push(part);
    }

    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Uppercased trimmed id; anything over 20 characters is noise.
pub fn clean_extracted_id(raw: &str) -> Option<String> {
    let id = raw.trim().to_uppercase();
    if id.is_empty() || id.len() > 20 {
        return None;
    }
    Some(id)
}

pub fn clean_categories(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(title_case)
        .collect()
}

fn normalize_quotes(text: &str) -> String {
    text.replace(['\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}', '"'], "'")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_url_requires_absolute_http() {
        assert_eq!(clean_url("  https://x.com/p/1 ").unwrap(), "https://x.com/p/1");
        assert_eq!(clean_url("   "), Err(CleanError::EmptyUrl));
        assert!(matches!(clean_url("/p/1"), Err(CleanError::NotAbsolute(_))));
    }

    #[test]
    fn clean_title_decodes_strips_and_collapses() {
        assert_eq!(
            clean_title("  <b>Pilot&#39;s   &quot;Kapmesser&quot;</b>  "),
            "Pilot's 'Kapmesser'"
        );
        assert_eq!(clean_title("<span></span>"), "");
        assert!(clean_title_strict("<span></span>").is_err());
    }

    #[test]
    fn clean_title_normalizes_fancy_quotes() {
        assert_eq!(clean_title("General\u{2019}s \u{201c}Attack\u{201d} Badge"), "General's 'Attack' Badge");
    }

    #[test]
    fn clean_description_drops_label_and_colons() {
        assert_eq!(
            clean_description("Description:   An  M35 helmet : "),
            "An M35 helmet"
        );
    }

    // The S5 grid: mixed European/US formats must all land on the same value.
    #[test]
    fn clean_price_handles_mixed_formats() {
        assert_eq!(clean_price("1.250,00"), Some(1250.0));
        assert_eq!(clean_price("1,250.00"), Some(1250.0));
        assert_eq!(clean_price("1.400"), Some(1400.0));
        assert_eq!(clean_price("1250"), Some(1250.0));
    }

    #[test]
    fn clean_price_strips_currency_and_markup() {
        assert_eq!(clean_price("<span>$12.00</span>"), Some(12.0));
        assert_eq!(clean_price("EUR 89,50"), Some(89.5));
        assert_eq!(clean_price("12.50"), Some(12.5));
        assert_eq!(clean_price("1.250.00"), Some(1250.0));
        assert_eq!(clean_price("priceless"), None);
    }

    #[test]
    fn clean_price_round_trips() {
        for raw in ["1.250,00", "1,250.00", "1.400", "12.50", "$89.99"] {
            let first = clean_price(raw).unwrap();
            let again = clean_price(&format!("{first:.2}")).unwrap();
            assert!((first - again).abs() < 0.005, "{raw} drifted: {first} vs {again}");
        }
    }

    #[test]
    fn clean_available_uses_closed_synonym_set() {
        assert_eq!(clean_available("In Stock"), Some(true));
        assert_eq!(clean_available("1 in stock"), Some(true));
        assert_eq!(clean_available("SOLD OUT"), Some(false));
        assert_eq!(clean_available("0"), Some(false));
        assert_eq!(clean_available("maybe later"), None);
    }

    #[test]
    fn element_text_fallback_detects_cart_actions() {
        assert!(available_from_element_text("Add to cart"));
        assert!(available_from_element_text("Currently IN STOCK"));
        assert!(!available_from_element_text("Ask us about this item"));
    }

    #[test]
    fn clean_url_list_fails_whole_list_on_bad_entry() {
        let good = vec!["https://x.com/a.jpg".to_string(), "http://y.de/b.jpg".to_string()];
        assert_eq!(clean_url_list(&good).unwrap().len(), 2);
        let bad = vec!["https://x.com/a.jpg".to_string(), "ftp://z.com/c.jpg".to_string()];
        assert!(clean_url_list(&bad).is_err());
    }

    #[test]
    fn clean_item_type_strips_prefixes_and_filler() {
        assert_eq!(
            clean_item_type("Categories: Helmets - M35, NEW"),
            Some("M35".to_string())
        );
        assert_eq!(clean_item_type("ARCHIVE: Militaria"), None);
        assert_eq!(
            clean_item_type("Edged Weapons (Daggers)"),
            Some("DAGGERS".to_string())
        );
        assert_eq!(clean_item_type("Badges (RELATED)"), Some("BADGES".to_string()));
        assert_eq!(clean_item_type(""), None);
    }

    #[test]
    fn clean_extracted_id_rejects_long_ids() {
        assert_eq!(clean_extracted_id(" k98-1941 "), Some("K98-1941".to_string()));
        assert_eq!(clean_extracted_id("x".repeat(21).as_str()), None);
        assert_eq!(clean_extracted_id(""), None);
    }

    #[test]
    fn clean_categories_title_cases() {
        let raw = vec!["  edged weapons ".to_string(), "".to_string(), "HELMETS".to_string()];
        assert_eq!(clean_categories(&raw), vec!["Edged Weapons", "Helmets"]);
    }

    #[test]
    fn nation_and_conflict_uppercase() {
        assert_eq!(clean_nation(" germany "), Some("GERMANY".to_string()));
        assert_eq!(clean_conflict("ww2"), Some("WW2".to_string()));
        assert_eq!(clean_nation("  "), None);
    }

    #[test]
    fn grade_title_cases() {
        assert_eq!(clean_grade("very good"), Some("Very Good".to_string()));
    }
}
