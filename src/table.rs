//! In-memory, column-oriented table shared by every pipeline stage.
//!
//! Tables are never mutated in place: each transform takes `&Table` and hands
//! back a new one, so a stage's input stays valid for the caller.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{PipelineError, Result};

/// A single nullable cell
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Timezone-aware instant
    Timestamp(DateTime<FixedOffset>),
    /// Wall-clock timestamp with no zone attached
    NaiveTimestamp(NaiveDateTime),
    Date(NaiveDate),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the cell; integers widen to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::NaiveTimestamp(_) => "naive_timestamp",
            Value::Date(_) => "date",
        }
    }

    /// Hashable identity of the cell, used for key uniqueness, joins and grouping.
    pub fn key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Int(i) => ValueKey::Int(*i),
            // -0.0 and 0.0 are the same key
            Value::Float(f) => ValueKey::Float(FloatKey(if *f == 0.0 { 0.0 } else { *f })),
            Value::Text(s) => ValueKey::Text(s.clone()),
            Value::Timestamp(ts) => ValueKey::Timestamp(*ts),
            Value::NaiveTimestamp(ts) => ValueKey::NaiveTimestamp(*ts),
            Value::Date(d) => ValueKey::Date(*d),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Timestamp(ts) => f.write_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::NaiveTimestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Hashable, totally ordered counterpart of [`Value`].
///
/// `Null` sorts last so grouped output lists missing keys at the end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    Bool(bool),
    Int(i64),
    Float(FloatKey),
    Text(String),
    Timestamp(DateTime<FixedOffset>),
    NaiveTimestamp(NaiveDateTime),
    Date(NaiveDate),
    Null,
}

/// `f64` ordered by `total_cmp`, so negatives sort before positives
#[derive(Debug, Clone, Copy)]
pub struct FloatKey(pub f64);

impl PartialEq for FloatKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatKey {}

impl std::hash::Hash for FloatKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl ValueKey {
    pub fn is_null(&self) -> bool {
        matches!(self, ValueKey::Null)
    }
}

impl fmt::Display for ValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKey::Null => f.write_str("<null>"),
            ValueKey::Bool(b) => write!(f, "{b}"),
            ValueKey::Int(i) => write!(f, "{i}"),
            ValueKey::Float(x) => write!(f, "{}", x.0),
            ValueKey::Text(s) => f.write_str(s),
            ValueKey::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
            ValueKey::NaiveTimestamp(ts) => write!(f, "{ts}"),
            ValueKey::Date(d) => write!(f, "{d}"),
        }
    }
}

/// A named column of cells
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }
}

/// Ordered set of equal-length, uniquely named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let expected = columns.first().map_or(0, Column::len);
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(PipelineError::DuplicateColumn(column.name.clone()));
            }
            if column.len() != expected {
                return Err(PipelineError::ColumnLength {
                    column: column.name.clone(),
                    expected,
                    actual: column.len(),
                });
            }
        }
        Ok(Self { columns })
    }

    /// Build a table from row-major data
    pub fn from_rows<S: AsRef<str>>(names: &[S], rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut columns: Vec<Column> = names
            .iter()
            .map(|n| Column::new(n.as_ref(), Vec::with_capacity(rows.len())))
            .collect();

        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != names.len() {
                return Err(PipelineError::ColumnLength {
                    column: format!("row {i}"),
                    expected: names.len(),
                    actual: row.len(),
                });
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }

        Self::from_columns(columns)
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Cells of `name`, or a schema error naming the absent column
    pub fn values(&self, name: &str) -> Result<&[Value]> {
        self.column(name)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| PipelineError::Schema {
                missing: vec![name.to_string()],
            })
    }

    pub fn get(&self, column: &str, row: usize) -> Option<&Value> {
        self.column(column).and_then(|c| c.values.get(row))
    }

    /// New table with `name` set to `values`: replaced in position if the column
    /// exists, appended otherwise.
    pub fn with_column(&self, name: &str, values: Vec<Value>) -> Result<Table> {
        if !self.columns.is_empty() && values.len() != self.len() {
            return Err(PipelineError::ColumnLength {
                column: name.to_string(),
                expected: self.len(),
                actual: values.len(),
            });
        }

        let mut columns = self.columns.clone();
        match columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => columns.push(Column::new(name, values)),
        }
        Ok(Table { columns })
    }

    pub fn with_columns(&self, added: Vec<Column>) -> Result<Table> {
        added
            .into_iter()
            .try_fold(self.clone(), |table, column| table.with_column(&column.name, column.values))
    }

    /// New table without the named columns; absent names are ignored
    pub fn without_columns<S: AsRef<str>>(&self, names: &[S]) -> Table {
        let columns = self
            .columns
            .iter()
            .filter(|c| !names.iter().any(|n| n.as_ref() == c.name))
            .cloned()
            .collect();
        Table { columns }
    }

    /// Gather rows by index; `None` produces an all-null row
    pub fn select_rows(&self, indices: &[Option<usize>]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let values = indices
                    .iter()
                    .map(|idx| idx.and_then(|i| c.values.get(i)).cloned().unwrap_or_default())
                    .collect();
                Column::new(c.name.clone(), values)
            })
            .collect();
        Table { columns }
    }

    pub fn row(&self, idx: usize) -> Option<Vec<&Value>> {
        if idx >= self.len() {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[idx]).collect())
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> + '_ {
        (0..self.len()).map(move |i| self.columns.iter().map(|c| &c.values[i]).collect())
    }
}
