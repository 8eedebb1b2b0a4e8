//! Distribution-based capping and flagging of a numeric measure.
//!
//! Rows are never dropped: winsorizing writes a capped copy of the column and
//! the IQR fence writes a boolean flag, leaving the raw measure as it was.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::enrich::Enricher;
use crate::table::{Table, Value};

/// Settings for the outlier stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Numeric column to cap and flag
    pub column: String,
    /// Lower winsorizing quantile
    pub winsor_lo: f64,
    /// Upper winsorizing quantile
    pub winsor_hi: f64,
    /// IQR multiplier for the fences (1.5 = mild outliers)
    pub iqr_k: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            column: constants::AMOUNT.to_string(),
            winsor_lo: 0.01,
            winsor_hi: 0.99,
            iqr_k: 1.5,
        }
    }
}

/// Quantile of ascending `sorted` data with linear interpolation between ranks.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Tukey fences `[Q1 - k*IQR, Q3 + k*IQR]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IqrFences {
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub lower: f64,
    pub upper: f64,
}

impl IqrFences {
    /// Fences over `values`, or `None` when there is nothing to measure
    pub fn compute(values: &[f64], k: f64) -> Option<Self> {
        let sorted = sorted_copy(values);
        let q1 = quantile(&sorted, 0.25)?;
        let q3 = quantile(&sorted, 0.75)?;
        let iqr = q3 - q1;
        Some(Self {
            q1,
            q3,
            iqr,
            lower: q1 - k * iqr,
            upper: q3 + k * iqr,
        })
    }

    /// Strictly outside the fences
    pub fn is_outlier(&self, x: f64) -> bool {
        x < self.lower || x > self.upper
    }
}

/// Clip every non-null value into `[quantile(lo), quantile(hi)]` of the
/// non-null values. Nulls stay null.
pub fn winsorize(values: &[Value], lo: f64, hi: f64) -> Result<Vec<Value>> {
    winsorize_column(values, "series", lo, hi)
}

fn winsorize_column(values: &[Value], column: &str, lo: f64, hi: f64) -> Result<Vec<Value>> {
    validate_quantile_bounds(lo, hi)?;
    let numbers = numeric(values, column)?;
    let present: Vec<f64> = numbers.iter().flatten().copied().collect();
    let sorted = sorted_copy(&present);

    let bounds = quantile(&sorted, lo).zip(quantile(&sorted, hi));
    if let Some((a, b)) = bounds {
        debug!("Winsorizing {} to [{}, {}]", column, a, b);
    }

    // Values already inside the bounds keep their original cell
    Ok(values
        .iter()
        .zip(numbers)
        .map(|(v, x)| match (x, bounds) {
            (Some(x), Some((a, _))) if x < a => Value::Float(a),
            (Some(x), Some((_, b))) if x > b => Value::Float(b),
            (Some(_), _) => v.clone(),
            (None, _) => Value::Null,
        })
        .collect())
}

/// Append `<column>_winsor`, the winsorized copy of `column`.
pub fn add_winsorized_column(table: &Table, column: &str, lo: f64, hi: f64) -> Result<Table> {
    let capped = winsorize_column(table.values(column)?, column, lo, hi)?;
    table.with_column(&constants::winsor_column(column), capped)
}

/// Append `<column>__is_outlier`: true iff the value lies strictly outside the
/// IQR fences computed over the non-null values. Nulls are never flagged.
pub fn add_outlier_flag(table: &Table, column: &str, k: f64) -> Result<Table> {
    if !k.is_finite() || k < 0.0 {
        return Err(PipelineError::invalid_parameter("k", format!("must be finite and >= 0, got {k}")));
    }

    let numbers = numeric(table.values(column)?, column)?;
    let present: Vec<f64> = numbers.iter().flatten().copied().collect();
    let fences = IqrFences::compute(&present, k);
    if let Some(f) = &fences {
        debug!(
            "IQR fences for {}: q1={} q3={} iqr={} -> [{}, {}]",
            column, f.q1, f.q3, f.iqr, f.lower, f.upper
        );
    }

    let flags: Vec<Value> = numbers
        .iter()
        .map(|x| {
            let flagged = matches!((x, &fences), (Some(x), Some(f)) if f.is_outlier(*x));
            Value::Bool(flagged)
        })
        .collect();

    let flagged = flags.iter().filter(|v| v.as_bool() == Some(true)).count();
    metrics::outliers::rows_flagged(column, flagged);
    info!("Flagged {} of {} rows in {} as outliers (k={})", flagged, flags.len(), column, k);

    table.with_column(&constants::outlier_flag_column(column), flags)
}

/// Winsorized copy plus outlier flag on one configured column
#[derive(Debug, Clone, Default)]
pub struct OutlierEngine {
    pub config: OutlierConfig,
}

impl OutlierEngine {
    pub fn with_config(config: OutlierConfig) -> Self {
        Self { config }
    }
}

impl Enricher for OutlierEngine {
    fn enrich(&self, table: &Table) -> Result<Table> {
        let capped = add_winsorized_column(table, &self.config.column, self.config.winsor_lo, self.config.winsor_hi)?;
        add_outlier_flag(&capped, &self.config.column, self.config.iqr_k)
    }
}

fn validate_quantile_bounds(lo: f64, hi: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
        return Err(PipelineError::invalid_parameter(
            "lo/hi",
            format!("need 0 <= lo <= hi <= 1, got lo={lo} hi={hi}"),
        ));
    }
    Ok(())
}

fn numeric(values: &[Value], column: &str) -> Result<Vec<Option<f64>>> {
    values
        .iter()
        .map(|v| match v {
            Value::Null => Ok(None),
            Value::Float(f) if f.is_nan() => Ok(None),
            Value::Int(_) | Value::Float(_) => Ok(v.as_f64()),
            other => Err(PipelineError::ColumnType {
                column: column.to_string(),
                expected: "numeric",
                found: other.type_name().to_string(),
            }),
        })
        .collect()
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}
