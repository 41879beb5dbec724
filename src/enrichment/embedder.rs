//! Embedder capability
//!
//! Produces the vector stored alongside each product for similarity
//! search. Like the classifier, an external capability: the crawler runs
//! without one and simply leaves the vector column untouched.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Title and description combined the way the embedding was trained.
pub fn embedding_text(title: &str, description: Option<&str>) -> String {
    match description {
        Some(description) if !description.is_empty() => format!("{title}\n{description}"),
        _ => title.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_text_joins_title_and_description() {
        assert_eq!(embedding_text("Helmet", Some("M35")), "Helmet\nM35");
        assert_eq!(embedding_text("Helmet", Some("")), "Helmet");
        assert_eq!(embedding_text("Helmet", None), "Helmet");
    }
}
