//! Pipeline module - page walking, diffing, detail processing, imagery,
//! availability reconciliation, and the outer scheduler

pub mod availability_tracker;
pub mod bad_images;
pub mod detail_processor;
pub mod image_subsystem;
pub mod scheduler;
pub mod site_processor;
pub mod tile_differ;
pub mod tile_pipeline;

pub use bad_images::BadImages;
pub use image_subsystem::ImageSubsystem;
pub use scheduler::Scheduler;
pub use tile_pipeline::TilePipeline;
