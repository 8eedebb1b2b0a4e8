use chrono::Utc;
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::app::ports::{Artifact, ArtifactSink, TableSource};
use crate::config::EtlConfig;
use crate::constants;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::metadata::{non_null_share, null_count, true_count, RunMetadata};
use crate::pipeline::processing::enrich::{Enricher, TimeEnricher};
use crate::pipeline::processing::join::{safe_left_join_with_stats, JoinStats};
use crate::pipeline::processing::normalize::{coerce_text, Normalizer, OrderNormalizer, ParseFailureCounts};
use crate::pipeline::processing::outliers::OutlierEngine;
use crate::pipeline::processing::quality_gate::{assert_row_count, require_columns, TableContract};
use crate::pipeline::processing::summary::summarize;
use crate::table::Table;

/// Where a run currently is. Stages only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    Init,
    Validated,
    Normalized,
    TimeEnriched,
    Joined,
    Enriched,
    Done,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Init => "init",
            PipelineStage::Validated => "validated",
            PipelineStage::Normalized => "normalized",
            PipelineStage::TimeEnriched => "time_enriched",
            PipelineStage::Joined => "joined",
            PipelineStage::Enriched => "enriched",
            PipelineStage::Done => "done",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a successful run produces, before anything is persisted
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub orders_clean: Table,
    pub users: Table,
    pub analytics: Table,
    pub summary: Option<Table>,
    pub metadata: RunMetadata,
}

/// Intermediate result of the transform stages
struct Analytics {
    table: Table,
    parse_failures: ParseFailureCounts,
    join_stats: JoinStats,
}

/// Sequences the stages over one orders/users pair
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: EtlConfig,
}

impl Pipeline {
    pub fn new(config: EtlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    /// Contract for the raw orders table, following the configured column names
    pub fn orders_contract(&self) -> TableContract {
        let transform = &self.config.transform;
        let mut required: Vec<&str> = vec![
            constants::ORDER_ID,
            constants::USER_ID,
            constants::AMOUNT,
            constants::QUANTITY,
        ];
        for extra in [
            transform.timestamp_column.as_str(),
            transform.normalizer.status_column.as_str(),
            transform.join_key.as_str(),
        ] {
            if !required.contains(&extra) {
                required.push(extra);
            }
        }
        TableContract::new("orders_raw", &required)
    }

    /// Contract for the users table: unique on the join key
    pub fn users_contract(&self) -> TableContract {
        let key = self.config.transform.join_key.as_str();
        let mut required: Vec<&str> = constants::USERS_COLUMNS.to_vec();
        if !required.contains(&key) {
            required.push(key);
        }
        TableContract::new("users", &required).with_unique_key(key)
    }

    /// The analytics table for `orders_raw` joined with `users`. No I/O.
    pub fn transform(&self, orders_raw: &Table, users: &Table) -> Result<Table> {
        let mut stage = PipelineStage::Init;
        self.build(orders_raw, users, &mut stage).map(|analytics| analytics.table)
    }

    /// Run every stage and assemble the outputs and run metadata. No I/O.
    #[instrument(skip_all, fields(orders = orders_raw.len(), users = users.len()))]
    pub fn run(&self, orders_raw: &Table, users: &Table) -> Result<PipelineOutput> {
        let started_at = Utc::now();
        let t_run = Instant::now();
        info!("🚀 Starting orders analytics run");
        metrics::pipeline::rows_in("orders_raw", orders_raw.len());
        metrics::pipeline::rows_in("users", users.len());

        let mut stage = PipelineStage::Init;
        let result = self.build(orders_raw, users, &mut stage).and_then(|analytics| {
            let output = self.finish(orders_raw, users, analytics, started_at)?;
            advance(&mut stage, PipelineStage::Done);
            Ok(output)
        });

        match &result {
            Ok(output) => {
                let secs = t_run.elapsed().as_secs_f64();
                metrics::pipeline::run_success(secs);
                metrics::pipeline::rows_out(Artifact::Analytics.as_str(), output.analytics.len());
                info!(
                    "✅ Run {} produced {} analytics rows in {:.3}s",
                    output.metadata.run_id,
                    output.analytics.len(),
                    secs
                );
            }
            Err(e) => {
                metrics::pipeline::run_error(e.kind());
                error!("❌ Run aborted after stage {}: {}", stage, e);
            }
        }
        result
    }

    /// Load both inputs, run, and only then write every artifact.
    ///
    /// Every artifact is staged before any is committed, and the sink publishes
    /// run metadata last, so its presence marks a complete set.
    #[instrument(skip_all)]
    pub fn run_and_persist(&self, source: &dyn TableSource, sink: &dyn ArtifactSink) -> Result<PipelineOutput> {
        info!("📂 Loading inputs");
        let orders_raw = source.load_orders()?;
        let users = source.load_users()?;

        let mut output = self.run(&orders_raw, &users)?;
        output.metadata.input_fingerprints = source.fingerprints();

        info!("💾 Writing artifacts");
        if let Err(e) = stage_artifacts(&output, sink).and_then(|_| sink.commit()) {
            error!("❌ Artifact write failed, discarding staged output: {}", e);
            metrics::pipeline::run_error(e.kind());
            sink.discard();
            return Err(e);
        }
        info!("💾 Wrote artifacts for run {}", output.metadata.run_id);

        Ok(output)
    }

    fn build(&self, orders_raw: &Table, users: &Table, stage: &mut PipelineStage) -> Result<Analytics> {
        let transform = &self.config.transform;

        let orders_contract = self.orders_contract();
        let users_contract = self.users_contract();
        // Columns on both tables before any emptiness or key check
        guarded(&orders_contract, require_columns(orders_raw, &orders_contract.required_columns))?;
        guarded(&users_contract, require_columns(users, &users_contract.required_columns))?;
        guarded(&orders_contract, orders_contract.enforce(orders_raw))?;
        guarded(&users_contract, users_contract.enforce(users))?;
        advance(stage, PipelineStage::Validated);

        let normalized = OrderNormalizer::with_config(transform.normalizer.clone()).normalize(orders_raw)?;
        advance(stage, PipelineStage::Normalized);

        let timed = TimeEnricher::new(&transform.timestamp_column, transform.utc).enrich(&normalized.table)?;
        advance(stage, PipelineStage::TimeEnriched);

        let left = timed.with_column(&transform.join_key, coerce_text(timed.values(&transform.join_key)?))?;
        let right = users.with_column(&transform.join_key, coerce_text(users.values(&transform.join_key)?))?;
        let (joined, join_stats) = safe_left_join_with_stats(
            &left,
            &right,
            &transform.join_key,
            transform.join_validation,
            &transform.join_suffixes,
        )?;
        assert_row_count(joined.len(), left.len(), "analytics")?;
        advance(stage, PipelineStage::Joined);

        let table = OutlierEngine::with_config(transform.outliers.clone()).enrich(&joined)?;
        advance(stage, PipelineStage::Enriched);

        Ok(Analytics {
            table,
            parse_failures: normalized.parse_failures,
            join_stats,
        })
    }

    fn finish(
        &self,
        orders_raw: &Table,
        users: &Table,
        analytics: Analytics,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<PipelineOutput> {
        let transform = &self.config.transform;
        let table = analytics.table;

        let orders_clean = derive_orders_clean(&table, users, &transform.join_key, &transform.join_suffixes.right);
        let summary = self.summary(&table)?;

        let outlier_column = constants::outlier_flag_column(&transform.outliers.column);
        let metadata = RunMetadata {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            rows_in_orders_raw: orders_raw.len(),
            rows_in_users: users.len(),
            rows_out_analytics: table.len(),
            missing_created_at: null_count(&table, &transform.timestamp_column),
            country_match_rate: non_null_share(&table, &transform.match_indicator_column),
            join_match_rate: analytics.join_stats.match_rate(),
            parse_failures: analytics.parse_failures.by_column,
            amount_outliers: true_count(&table, &outlier_column),
            input_fingerprints: Default::default(),
            config: self.config.snapshot(),
        };

        Ok(PipelineOutput {
            orders_clean,
            users: users.clone(),
            analytics: table,
            summary,
            metadata,
        })
    }

    fn summary(&self, analytics: &Table) -> Result<Option<Table>> {
        let report = &self.config.report;
        if !report.enabled {
            debug!("Summary report disabled");
            return Ok(None);
        }
        let group_by = report.summary.group_by.as_str();
        let measure = report.summary.measure.as_str();
        if !analytics.has_column(group_by) || !analytics.has_column(measure) {
            debug!("Skipping summary: {} or {} not in analytics table", group_by, measure);
            return Ok(None);
        }
        summarize(analytics, group_by, measure).map(Some)
    }
}

/// The analytics table without anything the join brought in from `users`:
/// non-key user columns and any column ending in `right_suffix`.
///
/// A user column whose suffixed twin is present collided with an order column,
/// so its bare name belongs to the order and is kept.
pub fn derive_orders_clean(analytics: &Table, users: &Table, key: &str, right_suffix: &str) -> Table {
    let mut dropped: Vec<&str> = users
        .column_names()
        .into_iter()
        .filter(|name| *name != key && analytics.has_column(name))
        .filter(|name| right_suffix.is_empty() || !analytics.has_column(&format!("{name}{right_suffix}")))
        .collect();
    if !right_suffix.is_empty() {
        dropped.extend(
            analytics
                .column_names()
                .into_iter()
                .filter(|name| name.ends_with(right_suffix)),
        );
    }
    analytics.without_columns(&dropped)
}

fn guarded(contract: &TableContract, check: Result<()>) -> Result<()> {
    check.map_err(|e: PipelineError| {
        metrics::quality_gate::violation(&contract.label);
        e
    })
}

fn stage_artifacts(output: &PipelineOutput, sink: &dyn ArtifactSink) -> Result<()> {
    sink.write_table(Artifact::OrdersClean, &output.orders_clean)?;
    sink.write_table(Artifact::Users, &output.users)?;
    sink.write_table(Artifact::Analytics, &output.analytics)?;
    if let Some(summary) = &output.summary {
        sink.write_table(Artifact::Summary, summary)?;
    }
    sink.write_run_metadata(&output.metadata)
}

fn advance(stage: &mut PipelineStage, next: PipelineStage) {
    debug_assert!(next > *stage, "stage moved backwards: {} -> {}", stage, next);
    info!(from = %stage, to = %next, "Pipeline stage {} -> {}", stage, next);
    *stage = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;

    fn orders() -> Table {
        Table::from_rows(
            &constants::ORDERS_RAW_COLUMNS,
            vec![
                vec!["o1", "u1", "10.5", "1", "2024-01-02T10:00:00Z", " Paid "],
                vec!["o2", "u2", "abc", "2", "2024-01-03 11:30:00", "REFUNDED"],
                vec!["o3", "u3", "12.0", "", "not a date", "pending"],
                vec!["o4", "u1", "9000", "1", "2024-01-04T00:00:00+02:00", "refund"],
                vec!["o5", "u2", "11.0", "3", "2024-01-05T08:00:00Z", "paid"],
            ]
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| if cell.is_empty() { Value::Null } else { Value::text(cell) })
                    .collect()
            })
            .collect(),
        )
        .unwrap()
    }

    fn users() -> Table {
        Table::from_rows(
            &constants::USERS_COLUMNS,
            vec![
                vec![Value::text("u1"), Value::text("US"), Value::text("2023-01-01")],
                vec![Value::text("u2"), Value::text("DE"), Value::text("2023-02-01")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_transform_preserves_row_count_and_adds_columns() {
        let analytics = Pipeline::default().transform(&orders(), &users()).unwrap();
        assert_eq!(analytics.len(), 5);
        for column in [
            "status_clean",
            "amount__isna",
            "quantity__isna",
            "date",
            "year",
            "month",
            "dow",
            "hour",
            "country",
            "signup_date",
            "amount_winsor",
            "amount__is_outlier",
        ] {
            assert!(analytics.has_column(column), "missing {column}");
        }
        assert_eq!(analytics.get("status_clean", 0), Some(&Value::text("paid")));
        assert_eq!(analytics.get("status_clean", 1), Some(&Value::text("refund")));
        assert_eq!(analytics.get("status_clean", 2), Some(&Value::text("pending")));
        assert_eq!(analytics.get("amount__isna", 1), Some(&Value::Bool(true)));
        assert_eq!(analytics.get("country", 2), Some(&Value::Null));
        assert_eq!(analytics.get("amount__is_outlier", 3), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_run_collects_metadata() {
        let output = Pipeline::default().run(&orders(), &users()).unwrap();
        let meta = &output.metadata;
        assert_eq!(meta.rows_in_orders_raw, 5);
        assert_eq!(meta.rows_in_users, 2);
        assert_eq!(meta.rows_out_analytics, 5);
        assert_eq!(meta.missing_created_at, Some(1));
        assert_eq!(meta.country_match_rate, Some(0.8));
        assert_eq!(meta.join_match_rate, Some(0.8));
        assert_eq!(meta.parse_failures.get("amount"), Some(&1));
        assert_eq!(meta.parse_failures.get("quantity"), Some(&0));
        assert_eq!(meta.amount_outliers, Some(1));
        assert_eq!(meta.config.get("transform.join_key").map(String::as_str), Some("user_id"));

        let summary = output.summary.unwrap();
        assert_eq!(summary.column_names(), vec!["country", "n", "revenue"]);
        assert_eq!(summary.get("country", 0), Some(&Value::text("US")));
    }

    #[test]
    fn test_orders_clean_drops_user_columns() {
        let output = Pipeline::default().run(&orders(), &users()).unwrap();
        let names = output.orders_clean.column_names();
        assert!(!names.contains(&"country"));
        assert!(!names.contains(&"signup_date"));
        assert!(names.contains(&"user_id"));
        assert!(names.contains(&"amount_winsor"));
        assert_eq!(output.orders_clean.len(), 5);
    }

    #[test]
    fn test_duplicate_user_aborts() {
        let users = Table::from_rows(
            &constants::USERS_COLUMNS,
            vec![
                vec![Value::text("u1"), Value::text("US"), Value::text("2023-01-01")],
                vec![Value::text("u1"), Value::text("CA"), Value::text("2023-01-02")],
            ],
        )
        .unwrap();
        let err = Pipeline::default().run(&orders(), &users).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateKey { .. }));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_missing_column_aborts_before_transform() {
        let orders = orders().without_columns(&["status", "amount"]);
        match Pipeline::default().run(&orders, &users()).unwrap_err() {
            PipelineError::Schema { missing } => assert_eq!(missing, vec!["amount", "status"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_users_schema_checked_before_empty_orders() {
        let orders = Table::from_rows(&constants::ORDERS_RAW_COLUMNS, vec![]).unwrap();
        let users = users().without_columns(&["country"]);
        match Pipeline::default().run(&orders, &users).unwrap_err() {
            PipelineError::Schema { missing } => assert_eq!(missing, vec!["country"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_orders_clean_keeps_order_fields_shadowed_by_users() {
        let users = users().with_column("amount", vec![Value::Float(1.0), Value::Float(2.0)]).unwrap();
        let output = Pipeline::default().run(&orders(), &users).unwrap();
        assert!(output.analytics.has_column("amount_user"));

        let clean = &output.orders_clean;
        assert!(clean.has_column("amount"));
        assert!(!clean.has_column("amount_user"));
        assert!(!clean.has_column("country"));
        assert_eq!(clean.get("amount", 0), Some(&Value::Float(10.5)));
    }

    #[test]
    fn test_empty_orders_rejected() {
        let orders = Table::from_rows(&constants::ORDERS_RAW_COLUMNS, vec![]).unwrap();
        let err = Pipeline::default().run(&orders, &users()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyTable { .. }));
    }

    #[test]
    fn test_numeric_user_ids_still_match() {
        let users = Table::from_rows(
            &constants::USERS_COLUMNS,
            vec![vec![Value::Int(7), Value::text("FR"), Value::text("2023-01-01")]],
        )
        .unwrap();
        let orders = Table::from_rows(
            &constants::ORDERS_RAW_COLUMNS,
            vec![vec![
                Value::text("o1"),
                Value::text("7"),
                Value::text("5"),
                Value::text("1"),
                Value::text("2024-01-01"),
                Value::text("paid"),
            ]],
        )
        .unwrap();
        let analytics = Pipeline::default().transform(&orders, &users).unwrap();
        assert_eq!(analytics.get("country", 0), Some(&Value::text("FR")));
    }

    #[test]
    fn test_stage_order() {
        assert!(PipelineStage::Init < PipelineStage::Validated);
        assert!(PipelineStage::Enriched < PipelineStage::Done);
        assert_eq!(PipelineStage::TimeEnriched.to_string(), "time_enriched");
    }
}
