use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::app::ports::{Artifact, ArtifactSink, TableSource};
use crate::error::Result;
use crate::pipeline::metadata::RunMetadata;
use crate::table::Table;

/// Source serving two tables already in memory
#[derive(Debug, Clone)]
pub struct InMemoryTableSource {
    pub orders: Table,
    pub users: Table,
}

impl InMemoryTableSource {
    pub fn new(orders: Table, users: Table) -> Self {
        Self { orders, users }
    }
}

impl TableSource for InMemoryTableSource {
    fn load_orders(&self) -> Result<Table> {
        Ok(self.orders.clone())
    }

    fn load_users(&self) -> Result<Table> {
        Ok(self.users.clone())
    }
}

#[derive(Debug, Default)]
struct Artifacts {
    tables: BTreeMap<Artifact, Table>,
    metadata: Option<RunMetadata>,
}

/// Sink that keeps whatever it is given once committed
#[derive(Debug, Default)]
pub struct InMemoryArtifactSink {
    staged: Mutex<Artifacts>,
    committed: Mutex<Artifacts>,
}

impl InMemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(artifacts: &Mutex<Artifacts>) -> MutexGuard<'_, Artifacts> {
        artifacts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn table(&self, artifact: Artifact) -> Option<Table> {
        Self::lock(&self.committed).tables.get(&artifact).cloned()
    }

    pub fn metadata(&self) -> Option<RunMetadata> {
        Self::lock(&self.committed).metadata.clone()
    }

    /// True when nothing at all has been committed
    pub fn is_empty(&self) -> bool {
        let committed = Self::lock(&self.committed);
        committed.tables.is_empty() && committed.metadata.is_none()
    }
}

impl ArtifactSink for InMemoryArtifactSink {
    fn write_table(&self, artifact: Artifact, table: &Table) -> Result<()> {
        Self::lock(&self.staged).tables.insert(artifact, table.clone());
        Ok(())
    }

    fn write_run_metadata(&self, metadata: &RunMetadata) -> Result<()> {
        Self::lock(&self.staged).metadata = Some(metadata.clone());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let staged = std::mem::take(&mut *Self::lock(&self.staged));
        *Self::lock(&self.committed) = staged;
        Ok(())
    }

    fn discard(&self) {
        *Self::lock(&self.staged) = Artifacts::default();
    }
}
