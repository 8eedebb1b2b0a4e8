//! Metrics for the analytics pipeline
//!
//! Recorded through the `metrics` facade; without an installed recorder every
//! call is a no-op, so the core stays free of exporter concerns.

use std::fmt;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Pipeline runs
    PipelineRunsSuccess,
    PipelineRunsError,
    PipelineDuration,

    // Rows
    RowsIn,
    RowsOut,

    // Quality Gate
    QualityGateViolations,

    // Normalize
    NormalizeRowsProcessed,
    NormalizeParseFailures,

    // Enrich
    EnrichTimestampsUnparsed,

    // Join
    JoinRowsMatched,
    JoinRowsUnmatched,

    // Outliers
    OutliersFlagged,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::PipelineRunsSuccess => "orders_pipeline_runs_success_total",
            MetricName::PipelineRunsError => "orders_pipeline_runs_error_total",
            MetricName::PipelineDuration => "orders_pipeline_duration_seconds",
            MetricName::RowsIn => "orders_pipeline_rows_in_total",
            MetricName::RowsOut => "orders_pipeline_rows_out_total",
            MetricName::QualityGateViolations => "orders_quality_gate_violations_total",
            MetricName::NormalizeRowsProcessed => "orders_normalize_rows_processed_total",
            MetricName::NormalizeParseFailures => "orders_normalize_parse_failures_total",
            MetricName::EnrichTimestampsUnparsed => "orders_enrich_timestamps_unparsed_total",
            MetricName::JoinRowsMatched => "orders_join_rows_matched_total",
            MetricName::JoinRowsUnmatched => "orders_join_rows_unmatched_total",
            MetricName::OutliersFlagged => "orders_outliers_flagged_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod pipeline {
    use super::MetricName;

    pub fn run_success(duration_secs: f64) {
        ::metrics::counter!(MetricName::PipelineRunsSuccess.as_str()).increment(1);
        ::metrics::histogram!(MetricName::PipelineDuration.as_str()).record(duration_secs);
    }

    pub fn run_error(error_kind: &str) {
        ::metrics::counter!(MetricName::PipelineRunsError.as_str(), "kind" => error_kind.to_string()).increment(1);
    }

    pub fn rows_in(table: &str, rows: usize) {
        ::metrics::counter!(MetricName::RowsIn.as_str(), "table" => table.to_string()).increment(rows as u64);
    }

    pub fn rows_out(table: &str, rows: usize) {
        ::metrics::counter!(MetricName::RowsOut.as_str(), "table" => table.to_string()).increment(rows as u64);
    }
}

pub mod quality_gate {
    use super::MetricName;

    pub fn violation(table: &str) {
        ::metrics::counter!(MetricName::QualityGateViolations.as_str(), "table" => table.to_string()).increment(1);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn rows_normalized(rows: usize) {
        ::metrics::counter!(MetricName::NormalizeRowsProcessed.as_str()).increment(rows as u64);
    }

    pub fn parse_failures(column: &str, failures: usize) {
        ::metrics::counter!(MetricName::NormalizeParseFailures.as_str(), "column" => column.to_string())
            .increment(failures as u64);
    }
}

pub mod enrich {
    use super::MetricName;

    pub fn timestamps_unparsed(count: usize) {
        ::metrics::counter!(MetricName::EnrichTimestampsUnparsed.as_str()).increment(count as u64);
    }
}

pub mod join {
    use super::MetricName;

    pub fn rows_joined(matched: usize, unmatched: usize) {
        ::metrics::counter!(MetricName::JoinRowsMatched.as_str()).increment(matched as u64);
        ::metrics::counter!(MetricName::JoinRowsUnmatched.as_str()).increment(unmatched as u64);
    }
}

pub mod outliers {
    use super::MetricName;

    pub fn rows_flagged(column: &str, count: usize) {
        ::metrics::counter!(MetricName::OutliersFlagged.as_str(), "column" => column.to_string())
            .increment(count as u64);
    }
}
