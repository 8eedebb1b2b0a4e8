use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::app::ports::TableSource;
use crate::error::Result;
use crate::table::{Table, Value};

/// Reads the raw orders and users tables from CSV files.
///
/// Every cell is read as text; empty cells become null. A SHA-256 digest of
/// each file is kept for the run metadata.
pub struct CsvTableSource {
    orders_path: PathBuf,
    users_path: PathBuf,
    fingerprints: Mutex<BTreeMap<String, String>>,
}

impl CsvTableSource {
    pub fn new(orders_path: impl Into<PathBuf>, users_path: impl Into<PathBuf>) -> Self {
        Self {
            orders_path: orders_path.into(),
            users_path: users_path.into(),
            fingerprints: Mutex::new(BTreeMap::new()),
        }
    }

    fn load(&self, name: &str, path: &Path) -> Result<Table> {
        let bytes = fs::read(path)?;
        let digest = hex::encode(Sha256::digest(&bytes));
        debug!("{} sha256={}", path.display(), digest);

        let table = parse_csv(&bytes)?;
        info!("📥 Read {} rows x {} columns from {}", table.len(), table.width(), path.display());

        self.fingerprints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), digest);
        Ok(table)
    }
}

impl TableSource for CsvTableSource {
    fn load_orders(&self) -> Result<Table> {
        self.load("orders", &self.orders_path)
    }

    fn load_users(&self) -> Result<Table> {
        self.load("users", &self.users_path)
    }

    fn fingerprints(&self) -> BTreeMap<String, String> {
        self.fingerprints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Read a CSV file with a header row into a text table
pub fn read_csv_table(path: &Path) -> Result<Table> {
    let bytes = fs::read(path)?;
    parse_csv(&bytes)
}

fn parse_csv(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|cell| if cell.is_empty() { Value::Null } else { Value::text(cell) })
                .collect(),
        );
    }
    Table::from_rows(headers.as_slice(), rows)
}
