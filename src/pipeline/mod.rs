// Batch pipeline: processing stages, the orchestrator that sequences them, and run metadata

pub mod metadata;
pub mod orchestrator;
pub mod processing;

pub use metadata::RunMetadata;
pub use orchestrator::{derive_orders_clean, Pipeline, PipelineOutput, PipelineStage};
