use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::constants;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::processing::quality_gate::require_columns;
use crate::table::{Table, Value};

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern compiles"));

/// Configuration for canonicalizing raw order records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Free-text status column read from the raw table
    pub status_column: String,
    /// Column receiving the normalized and mapped status
    pub status_clean_column: String,
    /// Normalized status value -> canonical code
    pub status_map: BTreeMap<String, String>,
    /// Columns that get a `<column>__isna` flag
    pub missing_flag_columns: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        let status_map = [("paid", "paid"), ("refund", "refund"), ("refunded", "refund")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self {
            status_column: constants::STATUS.to_string(),
            status_clean_column: constants::STATUS_CLEAN.to_string(),
            status_map,
            missing_flag_columns: vec![constants::AMOUNT.to_string(), constants::QUANTITY.to_string()],
        }
    }
}

/// Per-column count of non-null raw values that failed to coerce and became null
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailureCounts {
    pub by_column: BTreeMap<String, usize>,
}

impl ParseFailureCounts {
    pub fn get(&self, column: &str) -> usize {
        self.by_column.get(column).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.by_column.values().sum()
    }
}

/// A normalized table together with what the coercion silently nulled
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    pub table: Table,
    pub parse_failures: ParseFailureCounts,
}

/// Trait for canonicalizing a raw table
pub trait Normalizer {
    fn normalize(&self, raw: &Table) -> Result<NormalizedTable>;
}

/// Normalizer for the raw orders table
#[derive(Debug, Clone, Default)]
pub struct OrderNormalizer {
    pub config: NormalizerConfig,
}

impl OrderNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: NormalizerConfig) -> Self {
        Self { config }
    }
}

impl Normalizer for OrderNormalizer {
    fn normalize(&self, raw: &Table) -> Result<NormalizedTable> {
        require_columns(raw, &[constants::ORDER_ID, constants::USER_ID, constants::AMOUNT, constants::QUANTITY])?;
        require_columns(raw, &[self.config.status_column.as_str()])?;

        let typed = enforce_schema(raw)?;
        let parse_failures = count_parse_failures(raw, &typed, &[constants::AMOUNT, constants::QUANTITY])?;
        for (column, failures) in &parse_failures.by_column {
            if *failures > 0 {
                debug!("{} value(s) in {} failed to parse and became null", failures, column);
            }
            metrics::normalize::parse_failures(column, *failures);
        }

        let status = normalize_text(typed.values(&self.config.status_column)?);
        let status_clean = apply_mapping(&status, &self.config.status_map);
        let with_status = typed.with_column(&self.config.status_clean_column, status_clean)?;

        let table = add_missing_flags(&with_status, &self.config.missing_flag_columns)?;
        metrics::normalize::rows_normalized(table.len());
        info!(
            "Normalized {} order rows ({} parse failures)",
            table.len(),
            parse_failures.total()
        );

        Ok(NormalizedTable { table, parse_failures })
    }
}

/// Coerce the order identity and measure columns to their canonical types.
///
/// Ids become text; `amount` becomes a nullable decimal and `quantity` a
/// nullable integer. Unparseable values become null rather than failing.
pub fn enforce_schema(table: &Table) -> Result<Table> {
    require_columns(table, &[constants::ORDER_ID, constants::USER_ID, constants::AMOUNT, constants::QUANTITY])?;

    let order_id = table.values(constants::ORDER_ID)?.iter().map(to_text).collect();
    let user_id = table.values(constants::USER_ID)?.iter().map(to_text).collect();
    let amount = table
        .values(constants::AMOUNT)?
        .iter()
        .map(|v| parse_decimal(v).map_or(Value::Null, Value::Float))
        .collect();
    let quantity = table
        .values(constants::QUANTITY)?
        .iter()
        .map(|v| parse_integer(v).map_or(Value::Null, Value::Int))
        .collect();

    table
        .with_column(constants::ORDER_ID, order_id)?
        .with_column(constants::USER_ID, user_id)?
        .with_column(constants::AMOUNT, amount)?
        .with_column(constants::QUANTITY, quantity)
}

/// Add a boolean `<column>__isna` per column recording null-ness as of now.
pub fn add_missing_flags<S: AsRef<str>>(table: &Table, columns: &[S]) -> Result<Table> {
    require_columns(table, columns)?;

    let mut out = table.clone();
    for column in columns {
        let column = column.as_ref();
        let flags = table
            .values(column)?
            .iter()
            .map(|v| Value::Bool(v.is_null()))
            .collect();
        out = out.with_column(&constants::missing_flag_column(column), flags)?;
    }
    Ok(out)
}

/// Trim, lowercase and collapse whitespace runs to one space. Nulls stay null;
/// an empty result stays an empty string.
pub fn normalize_text(values: &[Value]) -> Vec<Value> {
    values
        .iter()
        .map(|v| match v {
            Value::Null => Value::Null,
            Value::Text(s) => Value::Text(normalize_str(s)),
            other => Value::Text(normalize_str(&other.to_string())),
        })
        .collect()
}

fn normalize_str(s: &str) -> String {
    let folded = s.trim().to_lowercase();
    WHITESPACE_RUN.replace_all(&folded, " ").into_owned()
}

/// Look text values up in `mapping`; unmapped values pass through unchanged.
pub fn apply_mapping(values: &[Value], mapping: &BTreeMap<String, String>) -> Vec<Value> {
    values
        .iter()
        .map(|v| match v {
            Value::Text(s) => mapping
                .get(s)
                .map_or_else(|| v.clone(), |mapped| Value::Text(mapped.clone())),
            other => other.clone(),
        })
        .collect()
}

/// Nullable decimal view of a raw cell. NaN and infinities count as missing.
pub fn parse_decimal(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Nullable integer view of a raw cell. Integral decimals ("2.0") are accepted.
pub fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        Value::Float(f) => integral(*f),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Render every non-null value as text, for id columns compared across tables
pub fn coerce_text(values: &[Value]) -> Vec<Value> {
    values.iter().map(to_text).collect()
}

fn to_text(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Text(_) => value.clone(),
        other => Value::Text(other.to_string()),
    }
}

/// Count, per column, raw non-null cells that are null after coercion.
pub fn count_parse_failures<S: AsRef<str>>(raw: &Table, typed: &Table, columns: &[S]) -> Result<ParseFailureCounts> {
    let mut counts = ParseFailureCounts::default();
    for column in columns {
        let column = column.as_ref();
        let failures = raw
            .values(column)?
            .iter()
            .zip(typed.values(column)?)
            .filter(|(before, after)| !before.is_null() && after.is_null())
            .count();
        counts.by_column.insert(column.to_string(), failures);
    }
    Ok(counts)
}
