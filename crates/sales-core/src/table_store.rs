use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const DATA_FILE: &str = "part-00000.parquet";
pub const MANIFEST_FILE: &str = "_table.json";

#[derive(Debug, Error)]
pub enum TableStoreError {
    #[error("invalid table name '{0}'")]
    InvalidName(String),

    #[error("table '{0}' does not exist")]
    MissingTable(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write parquet: {0}")]
    Polars(#[from] PolarsError),

    #[error("invalid table manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TableStoreError + '_ {
    move |source| TableStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: String,
}

/// Sidecar describing the data file of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableManifest {
    pub table: String,
    pub format: String,
    pub data_file: String,
    pub row_count: usize,
    pub columns: Vec<ColumnSpec>,
    pub blake3: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableWriteSummary {
    pub table: String,
    pub path: PathBuf,
    pub row_count: usize,
    pub blake3: String,
}

/// Directory-per-table warehouse. Tables are only ever replaced wholesale.
#[derive(Debug, Clone)]
pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Replaces the table `name` with `df`.
    ///
    /// The new version is written completely into a staging directory before
    /// the previous version is swapped out, so a failed write leaves the
    /// previous table untouched.
    pub fn overwrite(&self, name: &str, df: &DataFrame) -> Result<TableWriteSummary, TableStoreError> {
        validate_name(name)?;
        fs::create_dir_all(&self.root).map_err(io_error(&self.root))?;

        let staging = self.root.join(format!(".{name}.staging"));
        remove_dir_if_exists(&staging)?;
        fs::create_dir_all(&staging).map_err(io_error(&staging))?;

        let parquet_bytes = create_parquet_bytes(df)?;
        let digest = blake3::hash(&parquet_bytes).to_hex().to_string();
        let data_path = staging.join(DATA_FILE);
        fs::write(&data_path, &parquet_bytes).map_err(io_error(&data_path))?;

        let manifest = TableManifest {
            table: name.to_string(),
            format: "parquet".to_string(),
            data_file: DATA_FILE.to_string(),
            row_count: df.height(),
            columns: df
                .get_columns()
                .iter()
                .map(|column| ColumnSpec {
                    name: column.name().to_string(),
                    dtype: column.dtype().to_string(),
                })
                .collect(),
            blake3: digest.clone(),
        };
        let manifest_path = staging.join(MANIFEST_FILE);
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        fs::write(&manifest_path, manifest_bytes).map_err(io_error(&manifest_path))?;

        let target = self.table_path(name);
        let previous = self.root.join(format!(".{name}.previous"));
        remove_dir_if_exists(&previous)?;
        let had_previous = target.exists();
        if had_previous {
            fs::rename(&target, &previous).map_err(io_error(&target))?;
        }
        if let Err(source) = fs::rename(&staging, &target) {
            if had_previous {
                if let Err(restore) = fs::rename(&previous, &target) {
                    warn!(error = %restore, table = name, "failed to restore previous table version");
                }
            }
            return Err(TableStoreError::Io {
                path: target,
                source,
            });
        }
        remove_dir_if_exists(&previous)?;

        info!(
            table = name,
            rows = manifest.row_count,
            path = %target.display(),
            "table overwritten"
        );
        Ok(TableWriteSummary {
            table: name.to_string(),
            path: target,
            row_count: manifest.row_count,
            blake3: digest,
        })
    }

    pub fn manifest(&self, name: &str) -> Result<TableManifest, TableStoreError> {
        validate_name(name)?;
        let path = self.table_path(name).join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(TableStoreError::MissingTable(name.to_string()));
        }
        let content = fs::read(&path).map_err(io_error(&path))?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub fn read(&self, name: &str) -> Result<DataFrame, TableStoreError> {
        let manifest = self.manifest(name)?;
        let path = self.table_path(name).join(&manifest.data_file);
        let file = File::open(&path).map_err(io_error(&path))?;
        Ok(ParquetReader::new(file).finish()?)
    }
}

fn validate_name(name: &str) -> Result<(), TableStoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(TableStoreError::InvalidName(name.to_string()))
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<(), TableStoreError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(io_error(path))?;
    }
    Ok(())
}

fn create_parquet_bytes(df: &DataFrame) -> Result<Vec<u8>, TableStoreError> {
    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        let mut clone = df.clone();
        ParquetWriter::new(&mut cursor)
            .with_compression(ParquetCompression::Zstd(None))
            .with_statistics(StatisticsOptions::default())
            .finish(&mut clone)?;
    }
    Ok(buffer)
}
