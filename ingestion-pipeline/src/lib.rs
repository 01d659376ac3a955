#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunking;
pub mod extraction;
pub mod indexer;
pub mod metadata;
pub mod pipeline;

pub use pipeline::{IngestionConfig, IngestionPipeline, StageReport};
