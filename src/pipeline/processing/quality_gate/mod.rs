//! Structural preconditions checked before any transform touches a table.
//!
//! Every check is pure: it either returns `Ok(())` or fails with the matching
//! contract error. Nothing here rewrites data.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::constants;
use crate::error::{PipelineError, Result};
use crate::table::{Table, ValueKey};

/// Fail with a schema error naming every column of `names` absent from `table`.
pub fn require_columns<S: AsRef<str>>(table: &Table, names: &[S]) -> Result<()> {
    let missing: Vec<String> = names
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| !table.has_column(name))
        .map(|name| name.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        warn!("Missing required columns: {:?}", missing);
        Err(PipelineError::Schema { missing })
    }
}

/// Fail when `table` has zero rows.
pub fn assert_non_empty(table: &Table, label: &str) -> Result<()> {
    if table.is_empty() {
        warn!("Table {} is empty", label);
        return Err(PipelineError::EmptyTable {
            label: label.to_string(),
        });
    }
    Ok(())
}

/// Fail when `key_column` holds any repeated value. Repeated nulls count.
pub fn assert_unique_key(table: &Table, key_column: &str) -> Result<()> {
    let values = table.values(key_column)?;
    let (duplicates, surplus_rows) = duplicate_keys(values.iter().map(|v| v.key()));

    if duplicates.is_empty() {
        debug!("Key {} is unique over {} rows", key_column, values.len());
        return Ok(());
    }

    warn!("Key {} has {} repeated rows", key_column, surplus_rows);
    Err(PipelineError::DuplicateKey {
        column: key_column.to_string(),
        duplicates: duplicates.iter().map(ToString::to_string).collect(),
        surplus_rows,
    })
}

/// Fail when a stage produced a different number of rows than promised.
pub fn assert_row_count(actual: usize, expected: usize, label: &str) -> Result<()> {
    if actual != expected {
        return Err(PipelineError::RowCountInvariant {
            label: label.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Repeated keys in first-seen order, and how many rows beyond the first each contributed.
pub(crate) fn duplicate_keys(keys: impl Iterator<Item = ValueKey>) -> (Vec<ValueKey>, usize) {
    let mut counts: HashMap<ValueKey, usize> = HashMap::new();
    let mut repeated = Vec::new();
    let mut surplus = 0;

    for key in keys {
        let count = counts.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count == 2 {
            repeated.push(key);
        }
        if *count > 1 {
            surplus += 1;
        }
    }

    (repeated, surplus)
}

/// The preconditions one input table must meet before the pipeline uses it
#[derive(Debug, Clone)]
pub struct TableContract {
    /// Label used in errors and logs
    pub label: String,
    /// Columns that must be present
    pub required_columns: Vec<String>,
    /// Column that must hold unique values, if any
    pub unique_key: Option<String>,
    /// Whether zero rows is acceptable
    pub allow_empty: bool,
}

impl TableContract {
    pub fn new(label: &str, required_columns: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            required_columns: required_columns.iter().map(|c| c.to_string()).collect(),
            unique_key: None,
            allow_empty: false,
        }
    }

    pub fn with_unique_key(mut self, key: &str) -> Self {
        self.unique_key = Some(key.to_string());
        self
    }

    pub fn allowing_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    /// The "one" side of the orders-to-users join
    pub fn users() -> Self {
        Self::new("users", &constants::USERS_COLUMNS).with_unique_key(constants::USER_ID)
    }

    /// Run the checks in order: columns, then emptiness, then key uniqueness.
    pub fn enforce(&self, table: &Table) -> Result<()> {
        debug!("Enforcing contract for {} ({} rows)", self.label, table.len());
        require_columns(table, &self.required_columns)?;
        if !self.allow_empty {
            assert_non_empty(table, &self.label)?;
        }
        if let Some(key) = &self.unique_key {
            assert_unique_key(table, key)?;
        }
        Ok(())
    }
}
