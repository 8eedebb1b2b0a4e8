use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::app::ports::{Artifact, ArtifactSink};
use crate::config::PathsConfig;
use crate::error::Result;
use crate::pipeline::metadata::RunMetadata;
use crate::table::Table;

/// File-based implementation of ArtifactSink.
/// Tables go to CSV, run metadata to pretty JSON. Writes land in `.tmp`
/// siblings; `commit` checks every target, removes the previous run metadata,
/// renames the tables into place and publishes the new metadata last.
pub struct FileArtifactSink {
    orders_clean: PathBuf,
    users: PathBuf,
    analytics: PathBuf,
    summary: PathBuf,
    run_meta: PathBuf,
    /// (temp file, final path) pairs awaiting commit, metadata excluded
    staged: Mutex<Vec<(PathBuf, PathBuf)>>,
    staged_meta: Mutex<Option<PathBuf>>,
}

impl FileArtifactSink {
    /// Output locations from resolved `paths`; the summary lands in the reports directory.
    pub fn from_paths(paths: &PathsConfig, summary_file_name: &str) -> Self {
        Self {
            orders_clean: paths.out_orders_clean.clone(),
            users: paths.out_users.clone(),
            analytics: paths.out_analytics.clone(),
            summary: paths.reports_dir.join(summary_file_name),
            run_meta: paths.run_meta.clone(),
            staged: Mutex::new(Vec::new()),
            staged_meta: Mutex::new(None),
        }
    }

    pub fn path_for(&self, artifact: Artifact) -> &Path {
        match artifact {
            Artifact::OrdersClean => &self.orders_clean,
            Artifact::Users => &self.users,
            Artifact::Analytics => &self.analytics,
            Artifact::Summary => &self.summary,
        }
    }

    pub fn run_meta_path(&self) -> &Path {
        &self.run_meta
    }

    fn staged(&self) -> MutexGuard<'_, Vec<(PathBuf, PathBuf)>> {
        self.staged.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn staged_meta(&self) -> MutexGuard<'_, Option<PathBuf>> {
        self.staged_meta.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ArtifactSink for FileArtifactSink {
    fn write_table(&self, artifact: Artifact, table: &Table) -> Result<()> {
        let path = self.path_for(artifact).to_path_buf();
        let tmp = stage_bytes(&path, &encode_csv(table)?)?;
        self.staged().push((tmp, path));
        info!("Staged {} ({} rows)", artifact, table.len());
        Ok(())
    }

    fn write_run_metadata(&self, metadata: &RunMetadata) -> Result<()> {
        let json = serde_json::to_string_pretty(metadata)?;
        let tmp = stage_bytes(&self.run_meta, json.as_bytes())?;
        *self.staged_meta() = Some(tmp);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let staged = self.staged().clone();
        let staged_meta = self.staged_meta().clone();

        // Refuse before touching anything when a target cannot be replaced
        for target in staged.iter().map(|(_, path)| path).chain(staged_meta.iter().map(|_| &self.run_meta)) {
            if target.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("cannot replace directory {}", target.display()),
                )
                .into());
            }
        }

        match fs::remove_file(&self.run_meta) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        for (tmp, path) in &staged {
            fs::rename(tmp, path)?;
            info!("💾 Wrote {}", path.display());
        }
        if let Some(tmp) = &staged_meta {
            fs::rename(tmp, &self.run_meta)?;
            info!("💾 Wrote run metadata to {}", self.run_meta.display());
        }

        self.staged().clear();
        *self.staged_meta() = None;
        Ok(())
    }

    fn discard(&self) {
        let mut staged = self.staged();
        let mut staged_meta = self.staged_meta();
        for tmp in staged.drain(..).map(|(tmp, _)| tmp).chain(staged_meta.take()) {
            if let Err(e) = fs::remove_file(&tmp) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove staged file {}: {}", tmp.display(), e);
                }
            }
        }
    }
}

/// Write `table` as CSV with a header row. Nulls become empty cells.
pub fn write_csv_table(path: &Path, table: &Table) -> Result<()> {
    let tmp = stage_bytes(path, &encode_csv(table)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn encode_csv(table: &Table) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(table.column_names())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|value| value.to_string()))?;
    }
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

/// Write `bytes` to the `.tmp` sibling of `path`, returning the sibling
fn stage_bytes(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, bytes)?;
    Ok(tmp)
}
