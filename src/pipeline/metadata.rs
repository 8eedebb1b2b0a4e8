use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::table::Table;

/// Audit record written next to the outputs of every successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_in_orders_raw: usize,
    pub rows_in_users: usize,
    pub rows_out_analytics: usize,
    /// Unparseable or absent timestamps after time enrichment
    pub missing_created_at: Option<usize>,
    /// Share of analytics rows with a non-null match indicator column
    pub country_match_rate: Option<f64>,
    /// Share of order rows whose join key found a user
    pub join_match_rate: Option<f64>,
    /// Non-blank values that failed numeric coercion, per column
    pub parse_failures: BTreeMap<String, usize>,
    pub amount_outliers: Option<usize>,
    pub input_fingerprints: BTreeMap<String, String>,
    pub config: BTreeMap<String, String>,
}

impl RunMetadata {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Null cells in `column`, or `None` when the column is absent
pub fn null_count(table: &Table, column: &str) -> Option<usize> {
    table.column(column).map(|c| c.null_count())
}

/// `1 - null share` of `column`. `None` when absent or the table is empty.
pub fn non_null_share(table: &Table, column: &str) -> Option<f64> {
    let column = table.column(column)?;
    if column.is_empty() {
        return None;
    }
    Some(1.0 - column.null_count() as f64 / column.len() as f64)
}

/// Rows where a boolean flag column is true
pub fn true_count(table: &Table, column: &str) -> Option<usize> {
    table
        .column(column)
        .map(|c| c.values.iter().filter(|v| v.as_bool() == Some(true)).count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;

    #[test]
    fn test_share_and_counts() {
        let table = Table::from_rows(
            &["country", "flag"],
            vec![
                vec![Value::text("US"), Value::Bool(true)],
                vec![Value::Null, Value::Bool(false)],
                vec![Value::text("DE"), Value::Bool(true)],
                vec![Value::Null, Value::Null],
            ],
        )
        .unwrap();

        assert_eq!(null_count(&table, "country"), Some(2));
        assert_eq!(non_null_share(&table, "country"), Some(0.5));
        assert_eq!(true_count(&table, "flag"), Some(2));
        assert_eq!(non_null_share(&table, "missing"), None);
    }

    #[test]
    fn test_share_of_empty_table_is_none() {
        let table = Table::from_rows(&["country"], vec![]).unwrap();
        assert_eq!(non_null_share(&table, "country"), None);
    }
}
