// crates/sales-core/src/error.rs

use thiserror::Error;

use crate::acquisition::AcquisitionError;
use crate::config::ConfigError;
use crate::credentials::CredentialError;
use crate::features::FeatureError;
use crate::table_store::TableStoreError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential setup failed: {0}")]
    Credentials(#[from] CredentialError),

    #[error("Dataset acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Schema normalization failed: {0}")]
    Parser(#[from] sales_parser::ParserError),

    #[error("Feature derivation failed: {0}")]
    Features(#[from] FeatureError),

    #[error("Table store error: {0}")]
    TableStore(#[from] TableStoreError),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
