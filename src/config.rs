use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants;
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::join::{JoinSuffixes, JoinValidation};
use crate::pipeline::processing::normalize::NormalizerConfig;
use crate::pipeline::processing::outliers::OutlierConfig;
use crate::pipeline::processing::summary::SummaryConfig;

/// Environment variable overriding the project root
pub const ROOT_ENV_VAR: &str = "ETL_ROOT";

/// Input and output locations. Relative paths are resolved against `root`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub root: PathBuf,
    pub raw_orders: PathBuf,
    pub raw_users: PathBuf,
    pub out_orders_clean: PathBuf,
    pub out_users: PathBuf,
    pub out_analytics: PathBuf,
    pub run_meta: PathBuf,
    pub reports_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            raw_orders: PathBuf::from("data/raw/orders.csv"),
            raw_users: PathBuf::from("data/raw/users.csv"),
            out_orders_clean: PathBuf::from("data/processed/orders_clean.csv"),
            out_users: PathBuf::from("data/processed/users.csv"),
            out_analytics: PathBuf::from("data/processed/analytics_table.csv"),
            run_meta: PathBuf::from("data/processed/_run_meta.json"),
            reports_dir: PathBuf::from("reports"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl PathsConfig {
    /// Standard project layout under `root`
    pub fn from_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            ..Self::default()
        }
    }

    /// Copy with every path joined onto `root` (absolute paths are kept)
    pub fn resolve(&self) -> Self {
        let join = |p: &Path| self.root.join(p);
        Self {
            root: self.root.clone(),
            raw_orders: join(&self.raw_orders),
            raw_users: join(&self.raw_users),
            out_orders_clean: join(&self.out_orders_clean),
            out_users: join(&self.out_users),
            out_analytics: join(&self.out_analytics),
            run_meta: join(&self.run_meta),
            reports_dir: join(&self.reports_dir),
            log_dir: join(&self.log_dir),
        }
    }
}

/// Parameters of the transform core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub join_key: String,
    pub join_validation: JoinValidation,
    pub join_suffixes: JoinSuffixes,
    pub timestamp_column: String,
    pub utc: bool,
    /// User-side column whose presence marks a matched order
    pub match_indicator_column: String,
    pub normalizer: NormalizerConfig,
    pub outliers: OutlierConfig,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            join_key: constants::USER_ID.to_string(),
            join_validation: JoinValidation::ManyToOne,
            join_suffixes: JoinSuffixes::default(),
            timestamp_column: constants::CREATED_AT.to_string(),
            utc: true,
            match_indicator_column: constants::COUNTRY.to_string(),
            normalizer: NormalizerConfig::default(),
            outliers: OutlierConfig::default(),
        }
    }
}

/// Optional grouped report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub summary: SummaryConfig,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            summary: SummaryConfig::default(),
        }
    }
}

/// Complete configuration of one pipeline run, passed explicitly to the orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub paths: PathsConfig,
    pub transform: TransformConfig,
    pub report: ReportConfig,
}

impl EtlConfig {
    /// Defaults laid out under `root`
    pub fn from_root(root: &Path) -> Self {
        Self {
            paths: PathsConfig::from_root(root),
            ..Self::default()
        }
    }

    /// Load a TOML config file
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EtlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Config file (if any) with the root taken from `root_override`, then
    /// `ETL_ROOT`, then the file, in that order. Paths come back resolved.
    pub fn resolve(config_path: Option<&Path>, root_override: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        let env_root = std::env::var(ROOT_ENV_VAR).ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        if let Some(root) = root_override.or(env_root) {
            config.paths.root = root;
        }
        config.paths = config.paths.resolve();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the transform core would refuse mid-run
    pub fn validate(&self) -> Result<()> {
        let outliers = &self.transform.outliers;
        if !(0.0..=1.0).contains(&outliers.winsor_lo)
            || !(0.0..=1.0).contains(&outliers.winsor_hi)
            || outliers.winsor_lo > outliers.winsor_hi
        {
            return Err(PipelineError::Config(format!(
                "winsor bounds must satisfy 0 <= lo <= hi <= 1 (lo={}, hi={})",
                outliers.winsor_lo, outliers.winsor_hi
            )));
        }
        if !outliers.iqr_k.is_finite() || outliers.iqr_k < 0.0 {
            return Err(PipelineError::Config(format!(
                "iqr_k must be finite and >= 0 (got {})",
                outliers.iqr_k
            )));
        }
        if self.transform.join_key.trim().is_empty() {
            return Err(PipelineError::Config("join_key must not be empty".to_string()));
        }
        Ok(())
    }

    /// Every config value rendered as text, keyed by dotted path
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if let Ok(value) = serde_json::to_value(self) {
            flatten_into(&mut out, String::new(), &value);
        }
        out
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(out, path, child);
            }
        }
        serde_json::Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}
