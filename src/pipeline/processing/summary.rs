use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::constants;
use crate::error::{PipelineError, Result};
use crate::table::{Column, Table, Value, ValueKey};

/// Which measure to aggregate and by what
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub group_by: String,
    pub measure: String,
    /// File name of the report under the reports directory
    pub file_name: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            group_by: constants::COUNTRY.to_string(),
            measure: constants::AMOUNT.to_string(),
            file_name: "revenue_by_country.csv".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Group {
    first: Option<Value>,
    rows: i64,
    total: f64,
}

/// Row count and measure sum per `group_by` value, largest sum first.
///
/// Null group values form their own group. Null measures count as rows but add
/// nothing to the sum. Ties keep key order, with the null group last.
pub fn summarize(table: &Table, group_by: &str, measure: &str) -> Result<Table> {
    let keys = table.values(group_by)?;
    let amounts = table.values(measure)?;

    let mut groups: BTreeMap<ValueKey, Group> = BTreeMap::new();
    for (key, amount) in keys.iter().zip(amounts) {
        let group = groups.entry(key.key()).or_default();
        if group.first.is_none() {
            group.first = Some(key.clone());
        }
        group.rows += 1;
        match amount {
            Value::Null => {}
            Value::Int(_) | Value::Float(_) => {
                let x = amount.as_f64().unwrap_or(0.0);
                if !x.is_nan() {
                    group.total += x;
                }
            }
            other => {
                return Err(PipelineError::ColumnType {
                    column: measure.to_string(),
                    expected: "numeric",
                    found: other.type_name().to_string(),
                })
            }
        }
    }

    let mut ordered: Vec<Group> = groups.into_values().collect();
    ordered.sort_by(|a, b| b.total.total_cmp(&a.total));
    debug!("Summarized {} rows into {} {} groups", table.len(), ordered.len(), group_by);

    let mut group_col = Vec::with_capacity(ordered.len());
    let mut count_col = Vec::with_capacity(ordered.len());
    let mut sum_col = Vec::with_capacity(ordered.len());
    for group in ordered {
        group_col.push(group.first.unwrap_or_default());
        count_col.push(Value::Int(group.rows));
        sum_col.push(Value::Float(group.total));
    }

    Table::from_columns(vec![
        Column::new(group_by, group_col),
        Column::new(constants::SUMMARY_COUNT, count_col),
        Column::new(constants::SUMMARY_SUM, sum_col),
    ])
}
