//! The closed post-processor registry
//!
//! Every transform a profile may reference lives here. The set is closed:
//! adding a transform is a reviewed change, which keeps any profile fully
//! interpretable from the registry alone. The engine-level steps (`set`,
//! `from_url`, `submethod_exists`) are applied by the selector engine; this
//! module implements the pure value-to-value transforms.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::domain::site_profile::{PostProcess, TakeEnd};
use crate::extraction::selector_engine::Value;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Apply one pure transform. Returns `None` where the transform rejects the
/// value (`regex` without a match, `validate_startswith` failure).
pub fn apply_simple(value: Value, step: &PostProcess) -> Option<Value> {
    match step {
        PostProcess::Prepend(prefix) => Some(if value.truthy() {
            Value::Text(format!("{prefix}{}", value.to_text().trim()))
        } else {
            value
        }),
        PostProcess::Append(suffix) => Some(if value.truthy() {
            Value::Text(format!("{}{suffix}", value.to_text().trim()))
        } else {
            value
        }),
        PostProcess::SmartPrepend(prefix) => match value {
            Value::Text(s) if !s.starts_with("http") => Some(Value::Text(format!("{prefix}{s}"))),
            other => Some(other),
        },
        PostProcess::Strip => Some(Value::Text(value.to_text().trim().to_string())),
        PostProcess::StripHtmlTags => Some(Value::Text(
            HTML_TAG.replace_all(&value.to_text(), "").trim().to_string(),
        )),
        PostProcess::ReplaceAll(replacements) => {
            let mut text = value.to_text();
            for pair in replacements {
                text = text.replace(&pair.old, &pair.new);
            }
            Some(Value::Text(text))
        }
        PostProcess::RemovePrefix(prefix) => match value {
            Value::Text(s) => Some(Value::Text(
                s.strip_prefix(prefix.as_str()).unwrap_or(&s).trim().to_string(),
            )),
            other => Some(other),
        },
        PostProcess::RemoveSuffix(suffix) => match value {
            Value::Text(s) => Some(Value::Text(
                s.strip_suffix(suffix.as_str()).unwrap_or(&s).trim().to_string(),
            )),
            other => Some(other),
        },
        PostProcess::Split(spec) => {
            let text = value.to_text();
            let part = match spec.take {
                TakeEnd::First => text.split(spec.delimiter.as_str()).next(),
                TakeEnd::Last => text.rsplit(spec.delimiter.as_str()).next(),
            };
            Some(Value::Text(part.unwrap_or(&text).trim().to_string()))
        }
        PostProcess::Regex { pattern } => {
            let regex = match Regex::new(pattern) {
                Ok(regex) => regex,
                Err(e) => {
                    warn!("post_process regex '{pattern}' does not compile: {e}");
                    return None;
                }
            };
            regex
                .captures(&value.to_text())
                .and_then(|caps| caps.get(1))
                .map(|group| Value::Text(group.as_str().to_string()))
        }
        PostProcess::FindTextContains(spec) => {
            let haystack = value.to_text();
            let hit = if spec.case_insensitive {
                haystack.to_lowercase().contains(&spec.value.to_lowercase())
            } else {
                haystack.contains(&spec.value)
            };
            let branch = if hit { &spec.if_true } else { &spec.if_false };
            Value::from_json(branch)
        }
        PostProcess::ValidateStartswith(prefix) => match value {
            Value::Text(s) if s.starts_with(prefix.as_str()) => Some(Value::Text(s)),
            _ => None,
        },
        // Engine-level steps never reach here.
        PostProcess::Set(_) | PostProcess::FromUrl | PostProcess::SubmethodExists(_) => {
            Some(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::site_profile::{FindTextContainsSpec, Replacement, SplitSpec};

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn prepend_trims_then_prefixes() {
        let out = apply_simple(text("  /shop/item "), &PostProcess::Prepend("https://x".into()));
        assert_eq!(out, Some(text("https://x/shop/item")));
    }

    #[test]
    fn prepend_leaves_empty_value_alone() {
        let out = apply_simple(text(""), &PostProcess::Prepend("https://x".into()));
        assert_eq!(out, Some(text("")));
    }

    #[test]
    fn smart_prepend_skips_absolute_urls() {
        let step = PostProcess::SmartPrepend("https://x".into());
        assert_eq!(
            apply_simple(text("https://other.com/a"), &step),
            Some(text("https://other.com/a"))
        );
        assert_eq!(apply_simple(text("/a"), &step), Some(text("https://x/a")));
    }

    #[test]
    fn strip_html_tags_removes_markup() {
        let out = apply_simple(text("<a href=\"#\">US</a>"), &PostProcess::StripHtmlTags);
        assert_eq!(out, Some(text("US")));
    }

    #[test]
    fn replace_all_applies_sequentially() {
        let step = PostProcess::ReplaceAll(vec![
            Replacement { old: "Sold".into(), new: "".into() },
            Replacement { old: "  ".into(), new: " ".into() },
        ]);
        assert_eq!(apply_simple(text("Sold  Out"), &step), Some(text(" Out")));
    }

    #[test]
    fn remove_prefix_only_when_present() {
        let step = PostProcess::RemovePrefix("SKU:".into());
        assert_eq!(apply_simple(text("SKU: 1234"), &step), Some(text("1234")));
        assert_eq!(apply_simple(text("1234"), &step), Some(text("1234")));
    }

    #[test]
    fn split_takes_requested_end() {
        let step = PostProcess::Split(SplitSpec { delimiter: "-".into(), take: TakeEnd::Last });
        assert_eq!(apply_simple(text("WW2 - Helmets - M35"), &step), Some(text("M35")));
    }

    #[test]
    fn regex_returns_first_capture_group_or_none() {
        let step = PostProcess::Regex { pattern: r"\$(\d+)".into() };
        assert_eq!(apply_simple(text("price $120 net"), &step), Some(text("120")));
        assert_eq!(apply_simple(text("no price here"), &step), None);
    }

    #[test]
    fn find_text_contains_picks_configured_branch() {
        let step = PostProcess::FindTextContains(FindTextContainsSpec {
            value: "sold".into(),
            case_insensitive: true,
            if_true: serde_json::json!(false),
            if_false: serde_json::json!(true),
        });
        assert_eq!(apply_simple(text("SOLD OUT"), &step), Some(Value::Bool(false)));
        assert_eq!(apply_simple(text("In stock"), &step), Some(Value::Bool(true)));
    }

    #[test]
    fn validate_startswith_rejects_mismatch() {
        let step = PostProcess::ValidateStartswith("https://".into());
        assert_eq!(apply_simple(text("https://a"), &step), Some(text("https://a")));
        assert_eq!(apply_simple(text("javascript:void(0)"), &step), None);
    }
}
