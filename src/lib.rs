pub mod app;
pub mod config;
pub mod constants;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod table;

// Adapters for files on disk and in-memory tables
pub mod infra;

pub use config::EtlConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineOutput, RunMetadata};
pub use table::{Column, Table, Value};
