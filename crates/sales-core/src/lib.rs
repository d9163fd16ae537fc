pub mod acquisition;
pub mod aggregates;
pub mod config;
pub mod credentials;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod table_store;

pub use config::EtlConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineSummary};
