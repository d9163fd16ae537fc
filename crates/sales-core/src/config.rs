use std::path::{Path, PathBuf};
use std::time::Duration;

use sales_parser::ColumnMapping;
use serde::Deserialize;
use thiserror::Error;

use crate::credentials::default_credentials_path;

pub const CONFIG_ENV: &str = "SALES_ETL_CONFIG";
pub const WAREHOUSE_ENV: &str = "SALES_ETL_WAREHOUSE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub credentials: CredentialsConfig,
    pub dataset: DatasetConfig,
    pub acquisition: AcquisitionConfig,
    pub schema: SchemaConfig,
    pub warehouse: WarehouseConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub path: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: default_credentials_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Kaggle dataset identifier, `owner/slug`.
    pub id: String,
    pub archive: String,
    pub file: String,
    pub scratch_dir: PathBuf,
    pub storage_dir: PathBuf,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            id: "vincentcornlius/sales-orders".to_string(),
            archive: "sales-orders.zip".to_string(),
            file: "sales_data.csv".to_string(),
            scratch_dir: PathBuf::from("scratch"),
            storage_dir: PathBuf::from("filestore/tables"),
        }
    }
}

impl DatasetConfig {
    pub fn archive_path(&self) -> PathBuf {
        self.scratch_dir.join(&self.archive)
    }

    /// Where the CSV lives once it has been moved into storage.
    pub fn storage_path(&self) -> PathBuf {
        self.storage_dir.join(&self.file)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub program: String,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            program: "kaggle".to_string(),
            max_attempts: 3,
            backoff_ms: 2_000,
        }
    }
}

impl AcquisitionConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub mapping: ColumnMapping,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub root: PathBuf,
    pub table: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("warehouse"),
            table: "sales_data".to_string(),
        }
    }
}

impl EtlConfig {
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: EtlConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Loads the explicit path if given, else `SALES_ETL_CONFIG`, else the
    /// defaults. `SALES_ETL_WAREHOUSE` overrides the warehouse root.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        if let Some(root) = std::env::var_os(WAREHOUSE_ENV) {
            config.warehouse.root = PathBuf::from(root);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.acquisition.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.dataset.id.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "dataset.id '{}' must look like owner/slug",
                self.dataset.id
            )));
        }
        if self.warehouse.table.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "warehouse.table must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
