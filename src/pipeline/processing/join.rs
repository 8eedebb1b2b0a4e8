use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::quality_gate::{duplicate_keys, require_columns};
use crate::table::{Column, Table, ValueKey};

/// Declared cardinality of a join, checked before any row is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinValidation {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl JoinValidation {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinValidation::OneToOne => "one_to_one",
            JoinValidation::OneToMany => "one_to_many",
            JoinValidation::ManyToOne => "many_to_one",
            JoinValidation::ManyToMany => "many_to_many",
        }
    }

    fn requires_unique_left(&self) -> bool {
        matches!(self, JoinValidation::OneToOne | JoinValidation::OneToMany)
    }

    fn requires_unique_right(&self) -> bool {
        matches!(self, JoinValidation::OneToOne | JoinValidation::ManyToOne)
    }
}

impl fmt::Display for JoinValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinValidation {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "one_to_one" | "1:1" => Ok(JoinValidation::OneToOne),
            "one_to_many" | "1:m" => Ok(JoinValidation::OneToMany),
            "many_to_one" | "m:1" => Ok(JoinValidation::ManyToOne),
            "many_to_many" | "m:m" => Ok(JoinValidation::ManyToMany),
            other => Err(PipelineError::invalid_parameter(
                "validate",
                format!("unknown join validation '{other}'"),
            )),
        }
    }
}

/// Suffixes applied to colliding non-key column names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinSuffixes {
    pub left: String,
    pub right: String,
}

impl JoinSuffixes {
    pub fn new(left: &str, right: &str) -> Self {
        Self {
            left: left.to_string(),
            right: right.to_string(),
        }
    }
}

impl Default for JoinSuffixes {
    fn default() -> Self {
        Self::new("", "_user")
    }
}

/// How many left rows found a partner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    pub left_rows: usize,
    pub matched_rows: usize,
}

impl JoinStats {
    pub fn match_rate(&self) -> Option<f64> {
        (self.left_rows > 0).then(|| self.matched_rows as f64 / self.left_rows as f64)
    }
}

/// Left outer join of `right` onto `left` on `on`, failing before any matching
/// when `validate` is violated.
pub fn safe_left_join(
    left: &Table,
    right: &Table,
    on: &str,
    validate: JoinValidation,
    suffixes: &JoinSuffixes,
) -> Result<Table> {
    safe_left_join_with_stats(left, right, on, validate, suffixes).map(|(table, _)| table)
}

/// [`safe_left_join`] that also reports how many left rows matched.
///
/// Left row order is preserved. Null keys never match. Unmatched rows get
/// null right-side columns.
pub fn safe_left_join_with_stats(
    left: &Table,
    right: &Table,
    on: &str,
    validate: JoinValidation,
    suffixes: &JoinSuffixes,
) -> Result<(Table, JoinStats)> {
    require_columns(left, &[on])?;
    require_columns(right, &[on])?;

    if validate.requires_unique_left() {
        check_unique(left, on, validate, "left")?;
    }
    if validate.requires_unique_right() {
        check_unique(right, on, validate, "right")?;
    }

    let mut index: HashMap<ValueKey, Vec<usize>> = HashMap::new();
    for (i, value) in right.values(on)?.iter().enumerate() {
        let key = value.key();
        if !key.is_null() {
            index.entry(key).or_default().push(i);
        }
    }

    let mut left_rows = Vec::with_capacity(left.len());
    let mut right_rows = Vec::with_capacity(left.len());
    let mut matched_rows = 0;
    for (i, value) in left.values(on)?.iter().enumerate() {
        match index.get(&value.key()).filter(|_| !value.is_null()) {
            Some(partners) => {
                matched_rows += 1;
                for &j in partners {
                    left_rows.push(Some(i));
                    right_rows.push(Some(j));
                }
            }
            None => {
                left_rows.push(Some(i));
                right_rows.push(None);
            }
        }
    }

    let right_payload = right.without_columns(&[on]);
    let left_names: HashSet<&str> = left.column_names().into_iter().filter(|n| *n != on).collect();
    let collisions: HashSet<&str> = right_payload
        .column_names()
        .into_iter()
        .filter(|n| left_names.contains(n))
        .collect();

    if !collisions.is_empty() && suffixes.left.is_empty() && suffixes.right.is_empty() {
        return Err(PipelineError::invalid_parameter(
            "suffixes",
            format!("columns overlap but no suffix given: {collisions:?}"),
        ));
    }

    let rename = |name: &str, suffix: &str| {
        if collisions.contains(name) {
            format!("{name}{suffix}")
        } else {
            name.to_string()
        }
    };

    let mut columns: Vec<Column> = Vec::with_capacity(left.width() + right_payload.width());
    for column in left.select_rows(&left_rows).columns() {
        columns.push(Column::new(rename(&column.name, &suffixes.left), column.values.clone()));
    }
    for column in right_payload.select_rows(&right_rows).columns() {
        columns.push(Column::new(rename(&column.name, &suffixes.right), column.values.clone()));
    }

    let joined = Table::from_columns(columns)?;
    let stats = JoinStats {
        left_rows: left.len(),
        matched_rows,
    };

    metrics::join::rows_joined(matched_rows, left.len() - matched_rows);
    debug!("Join on {} renamed {} colliding column(s)", on, collisions.len());
    info!(
        "Joined {} left rows onto {} right rows on {} ({}): {} matched, {} output rows",
        left.len(),
        right.len(),
        on,
        validate,
        matched_rows,
        joined.len()
    );
    Ok((joined, stats))
}

fn check_unique(table: &Table, on: &str, validate: JoinValidation, side: &'static str) -> Result<()> {
    let (duplicates, surplus) = duplicate_keys(table.values(on)?.iter().map(|v| v.key()));
    if duplicates.is_empty() {
        return Ok(());
    }

    warn!(
        "Refusing {} join: {} side has {} repeated row(s) on {}",
        validate, side, surplus, on
    );
    Err(PipelineError::JoinCardinality {
        validation: validate.to_string(),
        key: on.to_string(),
        side,
        duplicates: duplicates.iter().map(ToString::to_string).collect(),
    })
}
