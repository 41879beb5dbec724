//! Extraction module - declarative selectors, cleaners, and image extractors

pub mod cleaners;
pub mod image_extractors;
pub mod post_process;
pub mod selector_engine;

pub use cleaners::CleanError;
pub use selector_engine::{SelectorError, Value};
