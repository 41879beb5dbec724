//! Declarative selector evaluation
//!
//! Turns a `SelectorSpec` plus a parsed HTML node into a typed value. The
//! query idiom mirrors the tag-plus-keyword-filter style the profiles were
//! written in: `method` picks the search, `args[0]` names a tag (or carries
//! a raw CSS selector for `select`/`select_one`), and `kwargs` adds
//! class/id/attribute filters. Missing nodes yield `None`; only a malformed
//! selector configuration is an error.

use scraper::{ElementRef, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

use crate::domain::site_profile::{
    DomQuery, PostProcess, QueryMethod, SelectorSpec, StaticValue, SubQuerySpec,
};
use crate::extraction::post_process;

/// A value produced by the engine or a post-processor step.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Bool(_) => None,
        }
    }

    /// String form; booleans render as `true`/`false`.
    pub fn to_text(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Text(s) => !s.is_empty(),
            Value::Bool(b) => *b,
        }
    }

    /// Convert a JSON literal from a profile into a pipeline value.
    pub fn from_json(json: &JsonValue) -> Option<Value> {
        match json {
            JsonValue::Null => None,
            JsonValue::Bool(b) => Some(Value::Bool(*b)),
            JsonValue::String(s) => Some(Value::Text(s.clone())),
            other => Some(Value::Text(other.to_string())),
        }
    }
}

/// Configuration errors. These are programmer errors in the profile, not
/// runtime extraction misses.
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("query compiles to invalid CSS selector '{css}': {reason}")]
    InvalidQuery { css: String, reason: String },
    #[error("method '{0:?}' requires at least one positional argument")]
    MissingArgument(QueryMethod),
    #[error("selector has neither a tag name nor keyword filters")]
    EmptyQuery,
    #[error("named-function selector is only valid for image extraction")]
    NamedFunctionHere,
    #[error("'{0:?}' is a multi-result method; use it only for tile selection")]
    MultiResultHere(QueryMethod),
}

/// Evaluate a selector against a node. `product_url` feeds the `from_url`
/// post-processor when deriving fields from the product URL itself.
pub fn extract(
    node: ElementRef<'_>,
    spec: &SelectorSpec,
    product_url: Option<&str>,
) -> Result<Option<Value>, SelectorError> {
    match spec {
        SelectorSpec::Static(StaticValue::Bool(b)) => Ok(Some(Value::Bool(*b))),
        SelectorSpec::Static(StaticValue::Text(s)) => Ok(Some(Value::Text(s.clone()))),
        SelectorSpec::Named(_) => Err(SelectorError::NamedFunctionHere),
        SelectorSpec::Query(query) => {
            let raw = run_query(node, query)?;
            Ok(run_pipeline(raw, &query.post_process, node, product_url))
        }
    }
}

/// Select the tile elements on a listing page. Only multi-result queries
/// (`find_all` / `select`) are accepted here.
pub fn select_all<'a>(
    root: ElementRef<'a>,
    spec: &SelectorSpec,
) -> Result<Vec<ElementRef<'a>>, SelectorError> {
    let SelectorSpec::Query(query) = spec else {
        return Err(SelectorError::EmptyQuery);
    };
    let selector = match query.method {
        QueryMethod::FindAll => compile_filter_query(&query.args, &query.kwargs)?,
        QueryMethod::Select => compile_css_query(&query.args)?,
        other => return Err(SelectorError::MultiResultHere(other)),
    };
    Ok(root.select(&selector).collect())
}

/// Whether the query matches anything under the node at all. Used by the
/// unavailability selectors that signal by mere presence.
pub fn query_matches(node: ElementRef<'_>, query: &DomQuery) -> Result<bool, SelectorError> {
    if query.method == QueryMethod::HasAttr {
        let attr_name = query
            .args
            .first()
            .ok_or(SelectorError::MissingArgument(QueryMethod::HasAttr))?;
        let attr_value = node.value().attr(attr_name).unwrap_or_default();
        return Ok(match &query.value {
            Some(token) => attr_value.split_whitespace().any(|t| t == token),
            None => !attr_value.is_empty(),
        });
    }
    let selector = compile_for_method(query)?;
    Ok(node.select(&selector).next().is_some())
}

fn run_query(node: ElementRef<'_>, query: &DomQuery) -> Result<Option<Value>, SelectorError> {
    // has_attr reads the current node without any sub-search. List-valued
    // attributes come back space-joined already in the DOM representation.
    if query.method == QueryMethod::HasAttr {
        let attr_name = query
            .args
            .first()
            .ok_or(SelectorError::MissingArgument(QueryMethod::HasAttr))?;
        let attr_value = node.value().attr(attr_name).unwrap_or_default();
        return Ok(Some(Value::Text(attr_value.trim().to_string())));
    }

    let selector = compile_for_method(query)?;
    let Some(element) = node.select(&selector).next() else {
        return Ok(None);
    };

    if let Some(attribute) = &query.attribute {
        let Some(attr_value) = element.value().attr(attribute) else {
            return Ok(None);
        };
        return Ok(Some(Value::Text(attr_value.trim().to_string())));
    }

    Ok(Some(Value::Text(collapsed_text(element))))
}

/// Element text with surrounding and internal whitespace collapsed.
pub fn collapsed_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn compile_for_method(query: &DomQuery) -> Result<Selector, SelectorError> {
    match query.method {
        QueryMethod::Select | QueryMethod::SelectOne => compile_css_query(&query.args),
        _ => compile_filter_query(&query.args, &query.kwargs),
    }
}

fn compile_css_query(args: &[String]) -> Result<Selector, SelectorError> {
    let css = args
        .first()
        .ok_or(SelectorError::MissingArgument(QueryMethod::Select))?;
    Selector::parse(css).map_err(|e| SelectorError::InvalidQuery {
        css: css.clone(),
        reason: e.to_string(),
    })
}

/// Compile a tag-plus-kwargs filter into a CSS selector. Post-processing
/// metadata keys (`expect`, `exists`) are stripped before compilation.
fn compile_filter_query(
    args: &[String],
    kwargs: &serde_json::Map<String, JsonValue>,
) -> Result<Selector, SelectorError> {
    let mut css = args.first().cloned().unwrap_or_default();
    for (key, value) in kwargs {
        match key.as_str() {
            "expect" | "exists" => continue,
            "class_" | "class" => {
                if let Some(classes) = value.as_str() {
                    for class in classes.split_whitespace() {
                        css.push('.');
                        css.push_str(class);
                    }
                }
            }
            "id" => {
                if let Some(id) = value.as_str() {
                    css.push('#');
                    css.push_str(id);
                }
            }
            "attrs" => {
                if let Some(attrs) = value.as_object() {
                    for (attr, attr_value) in attrs {
                        push_attr_filter(&mut css, attr, attr_value);
                    }
                }
            }
            attr => push_attr_filter(&mut css, attr, value),
        }
    }
    if css.is_empty() {
        return Err(SelectorError::EmptyQuery);
    }
    Selector::parse(&css).map_err(|e| SelectorError::InvalidQuery {
        css: css.clone(),
        reason: e.to_string(),
    })
}

fn push_attr_filter(css: &mut String, attr: &str, value: &JsonValue) {
    match value {
        JsonValue::Bool(true) => {
            css.push('[');
            css.push_str(attr);
            css.push(']');
        }
        JsonValue::String(s) => {
            css.push('[');
            css.push_str(attr);
            css.push_str("=\"");
            css.push_str(s);
            css.push_str("\"]");
        }
        _ => {}
    }
}

/// Drive a value through the post-process pipeline in declared order.
///
/// A null value skips every remaining step except the ones that explicitly
/// accept null (`set`, `from_url`, `submethod_exists`).
fn run_pipeline(
    mut value: Option<Value>,
    steps: &[PostProcess],
    node: ElementRef<'_>,
    product_url: Option<&str>,
) -> Option<Value> {
    for step in steps {
        match step {
            PostProcess::Set(json) => value = Value::from_json(json),
            PostProcess::FromUrl => {
                value = product_url.map(|u| Value::Text(u.to_string()));
            }
            PostProcess::SubmethodExists(sub) => {
                value = Some(Value::Bool(sub_query_matches(node, sub) == sub.expect));
            }
            simple => {
                if let Some(current) = value.take() {
                    value = post_process::apply_simple(current, simple);
                }
            }
        }
    }
    value
}

fn sub_query_matches(node: ElementRef<'_>, sub: &SubQuerySpec) -> bool {
    let probe = DomQuery {
        method: sub.method,
        args: sub.args.clone(),
        kwargs: sub.kwargs.clone(),
        attribute: None,
        exists: false,
        value: None,
        post_process: Vec::new(),
    };
    match query_matches(node, &probe) {
        Ok(hit) => hit,
        Err(e) => {
            warn!("submethod_exists probe failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn tile_doc() -> Html {
        Html::parse_document(
            r#"
            <ul>
              <li class="product sold-out" data-sku="K98-41">
                <a class="product-link" href="/shop/helmet-m35">
                  <h2 class="woocommerce-loop-product__title">  M35   Helmet </h2>
                </a>
                <span class="price"><bdi>$1,250.00</bdi></span>
                <span class="badge stock">Out of stock</span>
              </li>
            </ul>
            "#,
        )
    }

    fn query(json: serde_json::Value) -> SelectorSpec {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn find_with_class_kwarg_returns_collapsed_text() {
        let doc = tile_doc();
        let spec = query(serde_json::json!({
            "method": "find",
            "args": ["h2"],
            "kwargs": {"class_": "woocommerce-loop-product__title"}
        }));
        let value = extract(doc.root_element(), &spec, None).unwrap();
        assert_eq!(value, Some(Value::Text("M35 Helmet".to_string())));
    }

    #[test]
    fn attribute_extraction_reads_href() {
        let doc = tile_doc();
        let spec = query(serde_json::json!({
            "method": "find",
            "args": ["a"],
            "kwargs": {"class_": "product-link"},
            "attribute": "href",
            "post_process": [{"smart_prepend": "https://example.com"}]
        }));
        let value = extract(doc.root_element(), &spec, None).unwrap();
        assert_eq!(
            value,
            Some(Value::Text("https://example.com/shop/helmet-m35".to_string()))
        );
    }

    #[test]
    fn missing_node_yields_none_not_error() {
        let doc = tile_doc();
        let spec = query(serde_json::json!({
            "method": "find",
            "args": ["div"],
            "kwargs": {"class_": "no-such-thing"}
        }));
        assert_eq!(extract(doc.root_element(), &spec, None).unwrap(), None);
    }

    #[test]
    fn has_attr_reads_the_current_node() {
        let doc = tile_doc();
        let li_selector = Selector::parse("li.product").unwrap();
        let li = doc.select(&li_selector).next().unwrap();
        let spec = query(serde_json::json!({
            "method": "has_attr",
            "args": ["data-sku"]
        }));
        assert_eq!(
            extract(li, &spec, None).unwrap(),
            Some(Value::Text("K98-41".to_string()))
        );
    }

    #[test]
    fn has_attr_class_token_match() {
        let doc = tile_doc();
        let li_selector = Selector::parse("li.product").unwrap();
        let li = doc.select(&li_selector).next().unwrap();
        let probe: DomQuery = serde_json::from_value(serde_json::json!({
            "method": "has_attr",
            "args": ["class"],
            "value": "sold-out"
        }))
        .unwrap();
        assert!(query_matches(li, &probe).unwrap());
    }

    #[test]
    fn kwargs_metadata_keys_are_stripped_before_query() {
        let doc = tile_doc();
        let spec = query(serde_json::json!({
            "method": "find",
            "args": ["span"],
            "kwargs": {"class_": "badge", "exists": true, "expect": false}
        }));
        let value = extract(doc.root_element(), &spec, None).unwrap();
        assert_eq!(value, Some(Value::Text("Out of stock".to_string())));
    }

    #[test]
    fn select_all_collects_every_match() {
        let doc = Html::parse_document(
            "<div><p class=\"tile\">a</p><p class=\"tile\">b</p><p>c</p></div>",
        );
        let spec = query(serde_json::json!({
            "method": "find_all",
            "args": ["p"],
            "kwargs": {"class_": "tile"}
        }));
        let tiles = select_all(doc.root_element(), &spec).unwrap();
        assert_eq!(tiles.len(), 2);
    }

    #[test]
    fn submethod_exists_checks_element_subtree() {
        let doc = tile_doc();
        let li_selector = Selector::parse("li.product").unwrap();
        let li = doc.select(&li_selector).next().unwrap();
        let spec = query(serde_json::json!({
            "method": "find",
            "args": ["h2"],
            "post_process": [{"submethod_exists": {
                "method": "find",
                "args": ["span"],
                "kwargs": {"class_": "stock"},
                "expect": true
            }}]
        }));
        assert_eq!(extract(li, &spec, None).unwrap(), Some(Value::Bool(true)));
    }

    #[test]
    fn null_skips_transforms_until_set() {
        let doc = tile_doc();
        let spec = query(serde_json::json!({
            "method": "find",
            "args": ["div"],
            "kwargs": {"class_": "missing"},
            "post_process": [{"prepend": "x"}, {"set": true}]
        }));
        assert_eq!(
            extract(doc.root_element(), &spec, None).unwrap(),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn from_url_substitutes_the_product_url() {
        let doc = tile_doc();
        let spec = query(serde_json::json!({
            "method": "find",
            "args": ["h2"],
            "post_process": [
                "from_url",
                {"regex": {"pattern": "/shop/([a-z0-9-]+)"}}
            ]
        }));
        let value = extract(
            doc.root_element(),
            &spec,
            Some("https://example.com/shop/helmet-m35"),
        )
        .unwrap();
        assert_eq!(value, Some(Value::Text("helmet-m35".to_string())));
    }

    #[test]
    fn static_selectors_pass_through() {
        let doc = tile_doc();
        let spec: SelectorSpec = serde_json::from_str("\"true\"").unwrap();
        assert_eq!(
            extract(doc.root_element(), &spec, None).unwrap(),
            Some(Value::Text("true".to_string()))
        );
        let spec: SelectorSpec = serde_json::from_str("false").unwrap();
        assert_eq!(
            extract(doc.root_element(), &spec, None).unwrap(),
            Some(Value::Bool(false))
        );
    }

    #[test]
    fn named_function_selector_is_a_config_error() {
        let doc = tile_doc();
        let spec = query(serde_json::json!({"function": "woo_commerce"}));
        assert!(extract(doc.root_element(), &spec, None).is_err());
    }
}
