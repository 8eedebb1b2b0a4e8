use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Schema error: missing required column(s) {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("Empty table: {label} has zero rows")]
    EmptyTable { label: String },

    #[error("Duplicate key: column '{column}' has {surplus_rows} repeated row(s) (values: {})", .duplicates.join(", "))]
    DuplicateKey {
        column: String,
        duplicates: Vec<String>,
        surplus_rows: usize,
    },

    #[error("Join cardinality violated: '{validation}' requires unique '{key}' on the {side} table (repeated: {})", .duplicates.join(", "))]
    JoinCardinality {
        validation: String,
        key: String,
        side: &'static str,
        duplicates: Vec<String>,
    },

    #[error("Row count invariant violated for {label}: expected {expected} row(s), got {actual}")]
    RowCountInvariant {
        label: String,
        expected: usize,
        actual: usize,
    },

    #[error("Column '{column}' has {actual} value(s), expected {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("Column '{column}' expected {expected} values, found {found}")]
    ColumnType {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        PipelineError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Short stable label, used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Schema { .. } => "schema",
            PipelineError::EmptyTable { .. } => "empty_table",
            PipelineError::DuplicateKey { .. } => "duplicate_key",
            PipelineError::JoinCardinality { .. } => "join_cardinality",
            PipelineError::RowCountInvariant { .. } => "row_count_invariant",
            PipelineError::ColumnLength { .. } => "column_length",
            PipelineError::DuplicateColumn(_) => "duplicate_column",
            PipelineError::ColumnType { .. } => "column_type",
            PipelineError::InvalidParameter { .. } => "invalid_parameter",
            PipelineError::Config(_) => "config",
            PipelineError::Io(_) => "io",
            PipelineError::Csv(_) => "csv",
            PipelineError::Json(_) => "json",
            PipelineError::Toml(_) => "toml",
        }
    }

    /// True for the fatal data-contract failures that abort a run before output.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            PipelineError::Schema { .. }
                | PipelineError::EmptyTable { .. }
                | PipelineError::DuplicateKey { .. }
                | PipelineError::JoinCardinality { .. }
                | PipelineError::RowCountInvariant { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
