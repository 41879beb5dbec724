//! Infrastructure module - transport, storage, configuration, logging

pub mod catalog;
pub mod config;
pub mod http_client;
pub mod logging;
pub mod object_store;

pub use catalog::Catalog;
pub use config::{AppConfig, DbCredentials, RunMode, SchedulerConfig};
pub use http_client::{FetchedPage, HttpClient, HttpClientConfig};
pub use logging::init_logging;
pub use object_store::{ObjectStore, S3Credentials};
