use anyhow::Result;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use orders_analytics::app::Artifact;
use orders_analytics::config::EtlConfig;
use orders_analytics::infra::{read_csv_table, CsvTableSource, FileArtifactSink, InMemoryArtifactSink, InMemoryTableSource};
use orders_analytics::{Pipeline, PipelineError, RunMetadata, Table, Value};

const ORDERS_CSV: &str = "\
order_id,user_id,amount,quantity,created_at,status
o1,u1,10.5,2,2024-01-01T00:00:00Z,Paid
o2,u2,abc,1,2024-01-02T12:30:00Z,  REFUNDED
o3,u3,20.0,,2024-01-03 08:00:00,cancelled
o4,u1,15.0,1,,paid
";

const USERS_CSV: &str = "\
user_id,country,signup_date
u1,US,2023-01-01
u2,DE,2023-02-01
";

fn write_inputs(root: &Path, users_csv: &str) -> Result<()> {
    let raw = root.join("data/raw");
    fs::create_dir_all(&raw)?;
    fs::write(raw.join("orders.csv"), ORDERS_CSV)?;
    fs::write(raw.join("users.csv"), users_csv)?;
    Ok(())
}

fn file_pipeline(root: &Path) -> (Pipeline, CsvTableSource, FileArtifactSink) {
    let config = EtlConfig::resolve(None, Some(root.to_path_buf())).unwrap();
    let source = CsvTableSource::new(&config.paths.raw_orders, &config.paths.raw_users);
    let sink = FileArtifactSink::from_paths(&config.paths, &config.report.summary.file_name);
    (Pipeline::new(config), source, sink)
}

fn text_table(names: &[&str], rows: &[&[&str]]) -> Table {
    let rows = rows
        .iter()
        .map(|row| row.iter().map(|cell| Value::text(*cell)).collect())
        .collect();
    Table::from_rows(names, rows).unwrap()
}

#[test]
fn test_run_writes_every_artifact() -> Result<()> {
    let dir = tempdir()?;
    write_inputs(dir.path(), USERS_CSV)?;
    let (pipeline, source, sink) = file_pipeline(dir.path());

    let output = pipeline.run_and_persist(&source, &sink)?;
    assert_eq!(output.analytics.len(), 4);

    let processed = dir.path().join("data/processed");
    let analytics = read_csv_table(&processed.join("analytics_table.csv"))?;
    assert_eq!(analytics.len(), 4);
    assert_eq!(analytics.get("status_clean", 1), Some(&Value::text("refund")));
    assert_eq!(analytics.get("country", 2), Some(&Value::Null));
    assert_eq!(analytics.get("amount__isna", 1), Some(&Value::text("true")));

    let orders_clean = read_csv_table(&processed.join("orders_clean.csv"))?;
    assert!(!orders_clean.has_column("country"));
    assert_eq!(orders_clean.len(), 4);
    assert_eq!(read_csv_table(&processed.join("users.csv"))?.len(), 2);

    let report = read_csv_table(&dir.path().join("reports/revenue_by_country.csv"))?;
    assert_eq!(report.column_names(), vec!["country", "n", "revenue"]);
    assert_eq!(report.get("country", 0), Some(&Value::text("US")));
    assert_eq!(report.get("revenue", 0), Some(&Value::text("25.5")));

    let meta: RunMetadata = serde_json::from_str(&fs::read_to_string(processed.join("_run_meta.json"))?)?;
    assert_eq!(meta.rows_in_orders_raw, 4);
    assert_eq!(meta.rows_in_users, 2);
    assert_eq!(meta.rows_out_analytics, 4);
    assert_eq!(meta.missing_created_at, Some(1));
    assert_eq!(meta.parse_failures.get("amount"), Some(&1));
    assert_eq!(meta.country_match_rate, Some(0.75));
    assert_eq!(meta.input_fingerprints.len(), 2);
    assert_eq!(meta.input_fingerprints["orders"].len(), 64);
    assert_eq!(meta.run_id, output.metadata.run_id);
    Ok(())
}

#[test]
fn test_duplicate_user_key_writes_nothing() -> Result<()> {
    let dir = tempdir()?;
    write_inputs(dir.path(), "user_id,country,signup_date\nu1,US,2023-01-01\nu1,CA,2023-01-02\n")?;
    let (pipeline, source, sink) = file_pipeline(dir.path());

    let err = pipeline.run_and_persist(&source, &sink).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateKey { .. }));
    assert!(!dir.path().join("data/processed").exists());
    assert!(!dir.path().join("reports").exists());
    Ok(())
}

#[test]
fn test_rerun_overwrites_outputs() -> Result<()> {
    let dir = tempdir()?;
    write_inputs(dir.path(), USERS_CSV)?;
    let (pipeline, source, sink) = file_pipeline(dir.path());

    let first = pipeline.run_and_persist(&source, &sink)?;
    let second = pipeline.run_and_persist(&source, &sink)?;
    assert_ne!(first.metadata.run_id, second.metadata.run_id);
    assert_eq!(first.metadata.input_fingerprints, second.metadata.input_fingerprints);

    let analytics = read_csv_table(&dir.path().join("data/processed/analytics_table.csv"))?;
    assert_eq!(analytics.len(), 4);
    Ok(())
}

#[test]
fn test_blocked_rerun_keeps_previous_artifacts() -> Result<()> {
    let dir = tempdir()?;
    write_inputs(dir.path(), USERS_CSV)?;
    let (pipeline, source, sink) = file_pipeline(dir.path());
    let first = pipeline.run_and_persist(&source, &sink)?;

    let processed = dir.path().join("data/processed");
    fs::write(
        dir.path().join("data/raw/orders.csv"),
        "order_id,user_id,amount,quantity,created_at,status\no9,u1,1.0,1,2024-02-01T00:00:00Z,paid\no8,u2,2.0,1,2024-02-02T00:00:00Z,paid\n",
    )?;
    fs::remove_file(processed.join("analytics_table.csv"))?;
    fs::create_dir(processed.join("analytics_table.csv"))?;

    let (pipeline, source, sink) = file_pipeline(dir.path());
    assert!(pipeline.run_and_persist(&source, &sink).is_err());

    let orders_clean = read_csv_table(&processed.join("orders_clean.csv"))?;
    assert_eq!(orders_clean.get("order_id", 0), Some(&Value::text("o1")));
    assert_eq!(orders_clean.len(), 4);
    let meta: RunMetadata = serde_json::from_str(&fs::read_to_string(processed.join("_run_meta.json"))?)?;
    assert_eq!(meta.run_id, first.metadata.run_id);
    for entry in fs::read_dir(&processed)? {
        let name = entry?.file_name();
        assert!(!name.to_string_lossy().ends_with(".tmp"), "leftover {:?}", name);
    }
    Ok(())
}

#[test]
fn test_clean_join_scenario() {
    let orders = text_table(
        &["order_id", "user_id", "amount", "quantity", "created_at", "status"],
        &[&["o1", "u1", "10.5", "2", "2024-01-01T00:00:00Z", "Paid"]],
    );
    let users = text_table(&["user_id", "country", "signup_date"], &[&["u1", "US", "2023-01-01"]]);

    let joined = Pipeline::default().transform(&orders, &users).unwrap();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined.get("status_clean", 0), Some(&Value::text("paid")));
    assert_eq!(joined.get("country", 0), Some(&Value::text("US")));
    assert_eq!(joined.get("amount__isna", 0), Some(&Value::Bool(false)));
    assert_eq!(joined.get("amount__is_outlier", 0), Some(&Value::Bool(false)));
    assert_eq!(joined.get("year", 0), Some(&Value::Int(2024)));
}

#[test]
fn test_unparseable_amount_completes() {
    let orders = text_table(
        &["order_id", "user_id", "amount", "quantity", "created_at", "status"],
        &[
            &["o1", "u1", "abc", "1", "2024-01-01T00:00:00Z", "paid"],
            &["o2", "u1", "12", "1", "2024-01-02T00:00:00Z", "cancelled"],
        ],
    );
    let users = text_table(&["user_id", "country", "signup_date"], &[&["u1", "US", "2023-01-01"]]);
    let source = InMemoryTableSource::new(orders, users);
    let sink = InMemoryArtifactSink::new();

    let output = Pipeline::default().run_and_persist(&source, &sink).unwrap();
    let analytics = sink.table(Artifact::Analytics).unwrap();
    assert_eq!(analytics.get("amount", 0), Some(&Value::Null));
    assert_eq!(analytics.get("amount__isna", 0), Some(&Value::Bool(true)));
    assert_eq!(analytics.get("amount__is_outlier", 0), Some(&Value::Bool(false)));
    assert_eq!(analytics.get("status_clean", 1), Some(&Value::text("cancelled")));
    assert_eq!(output.metadata.parse_failures.get("amount"), Some(&1));
    assert_eq!(sink.metadata().unwrap().run_id, output.metadata.run_id);
}

#[test]
fn test_failed_run_leaves_sink_untouched() {
    let orders = text_table(
        &["order_id", "user_id", "amount", "quantity", "created_at"],
        &[&["o1", "u1", "1", "1", "2024-01-01"]],
    );
    let users = text_table(&["user_id", "country", "signup_date"], &[&["u1", "US", "2023-01-01"]]);
    let sink = InMemoryArtifactSink::new();

    let err = Pipeline::default()
        .run_and_persist(&InMemoryTableSource::new(orders, users), &sink)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Schema { ref missing } if missing == &vec!["status".to_string()]));
    assert!(sink.is_empty());
}

#[test]
fn test_summary_can_be_disabled() {
    let orders = text_table(
        &["order_id", "user_id", "amount", "quantity", "created_at", "status"],
        &[&["o1", "u1", "5", "1", "2024-01-01T00:00:00Z", "paid"]],
    );
    let users = text_table(&["user_id", "country", "signup_date"], &[&["u1", "US", "2023-01-01"]]);
    let mut config = EtlConfig::default();
    config.report.enabled = false;
    let sink = InMemoryArtifactSink::new();

    let output = Pipeline::new(config)
        .run_and_persist(&InMemoryTableSource::new(orders, users), &sink)
        .unwrap();
    assert!(output.summary.is_none());
    assert!(sink.table(Artifact::Summary).is_none());
    assert!(sink.table(Artifact::OrdersClean).is_some());
}
