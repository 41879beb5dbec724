//! Milivault - federated militaria-listing crawler
//!
//! Scrapes many independently structured e-commerce sites through
//! declarative per-site profiles, normalizes product records into one
//! relational catalog, stores imagery in an object store, and continuously
//! reconciles availability with safety rails against incomplete scrapes.
//!
//! Module organization:
//! - `domain`: value types and the site profile configuration model
//! - `extraction`: selector engine, post-processors, cleaners, image extractors
//! - `infrastructure`: HTTP, catalog, object store, config, logging
//! - `pipeline`: tile walk, diffing, detail processing, imagery, scheduler
//! - `enrichment`: optional classifier and embedder capabilities

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod domain;
pub mod enrichment;
pub mod extraction;
pub mod infrastructure;
pub mod pipeline;
