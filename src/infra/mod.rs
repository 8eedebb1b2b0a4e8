// Infrastructure adapters implementing the app ports

pub mod csv_table_source;
pub mod file_artifact_sink;
pub mod in_memory;

pub use csv_table_source::{read_csv_table, CsvTableSource};
pub use file_artifact_sink::{write_csv_table, FileArtifactSink};
pub use in_memory::{InMemoryArtifactSink, InMemoryTableSource};
