use std::fs;
use std::path::{Path, PathBuf};

use polars::prelude::DataFrame;
use sales_parser::{normalize_csv, ColumnMapping};
use serde::Serialize;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::aggregates::{build_report, SalesReport};
use crate::config::EtlConfig;
use crate::error::{PipelineError, Result};
use crate::features::derive_features;
use crate::table_store::{TableStore, TableWriteSummary};

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub source: PathBuf,
    pub source_blake3: String,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub table: Option<TableWriteSummary>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub summary: PipelineSummary,
    pub report: SalesReport,
}

/// Normalizes raw CSV content and derives the feature columns.
pub fn prepare_sales_frame(content: &str, mapping: ColumnMapping) -> Result<DataFrame> {
    let normalized = normalize_csv(content, mapping)?;
    info!(rows = normalized.height(), "sales data normalized");
    Ok(derive_features(normalized)?)
}

/// Load, normalize, enrich, aggregate, persist.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: EtlConfig,
    persist: bool,
}

impl Pipeline {
    pub fn new(config: EtlConfig) -> Self {
        Self {
            config,
            persist: true,
        }
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    pub fn table_store(&self) -> TableStore {
        TableStore::new(&self.config.warehouse.root)
    }

    /// Runs against the CSV in the configured storage location.
    pub fn run(&self) -> Result<PipelineOutcome> {
        let source = self.config.dataset.storage_path();
        self.run_from_source(&source)
    }

    pub fn run_from_source(&self, source: &Path) -> Result<PipelineOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id);
        let _guard = span.enter();

        let bytes = fs::read(source).map_err(PipelineError::Io)?;
        let source_blake3 = blake3::hash(&bytes).to_hex().to_string();
        let content = String::from_utf8_lossy(&bytes);
        info!(source = %source.display(), bytes = bytes.len(), "loading sales data");

        let frame = prepare_sales_frame(&content, self.config.schema.mapping)?;
        let report = build_report(&frame)?;

        let table = if self.persist {
            Some(
                self.table_store()
                    .overwrite(&self.config.warehouse.table, &frame)?,
            )
        } else {
            info!("persistence disabled; table left unchanged");
            None
        };

        let summary = PipelineSummary {
            run_id,
            source: source.to_path_buf(),
            source_blake3,
            row_count: frame.height(),
            columns: frame
                .get_column_names()
                .iter()
                .map(|name| name.to_string())
                .collect(),
            table,
        };
        info!(rows = summary.row_count, "pipeline finished");
        Ok(PipelineOutcome { summary, report })
    }
}
