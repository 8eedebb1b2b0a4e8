use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::pipeline::metadata::RunMetadata;
use crate::table::Table;

/// Where the two raw input tables come from
pub trait TableSource {
    fn load_orders(&self) -> Result<Table>;
    fn load_users(&self) -> Result<Table>;

    /// Content digests of the inputs read so far, keyed by input name
    fn fingerprints(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Named tabular outputs of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Artifact {
    OrdersClean,
    Users,
    Analytics,
    Summary,
}

impl Artifact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Artifact::OrdersClean => "orders_clean",
            Artifact::Users => "users",
            Artifact::Analytics => "analytics_table",
            Artifact::Summary => "summary",
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence for finished artifacts. Called only once every stage has succeeded.
///
/// Writes are staged and become visible only on `commit`, which publishes the
/// run metadata last. A failed run calls `discard` instead.
pub trait ArtifactSink {
    fn write_table(&self, artifact: Artifact, table: &Table) -> Result<()>;
    fn write_run_metadata(&self, metadata: &RunMetadata) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn discard(&self);
}
