//! Enrichment module - optional classifier and embedder capabilities

pub mod classifier;
pub mod embedder;

pub use classifier::{apply_label_gates, label_disabled, Classification, Classifier};
pub use embedder::{embedding_text, Embedder};
