use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("expected {expected} columns but the header has {found}: {headers:?}")]
    ColumnCount {
        expected: usize,
        found: usize,
        headers: Vec<String>,
    },

    #[error("header does not provide a column for '{column}'; found {headers:?}")]
    MissingColumn {
        column: &'static str,
        headers: Vec<String>,
    },

    #[error("header maps both '{first}' and '{second}' to '{column}'")]
    AmbiguousColumn {
        column: &'static str,
        first: String,
        second: String,
    },

    #[error("CSV error: {source}")]
    Csv {
        #[source]
        source: csv::Error,
    },

    #[error("data row {line_index} invalid in column '{column}': {message}")]
    DataRow {
        line_index: usize,
        column: &'static str,
        message: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build sales dataframe: {message}")]
    Frame { message: String },
}

impl From<csv::Error> for ParserError {
    fn from(source: csv::Error) -> Self {
        ParserError::Csv { source }
    }
}
