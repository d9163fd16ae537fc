use std::fs;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use polars::prelude::*;
use tracing::debug;

use crate::errors::ParserError;
use crate::schema::{resolve_columns, ColumnKind, ColumnMapping, SalesColumn};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d"];

enum ColumnBuffer {
    Timestamp(Vec<Option<i64>>),
    Text(Vec<Option<String>>),
    Float(Vec<Option<f64>>),
}

impl ColumnBuffer {
    fn for_kind(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Timestamp => ColumnBuffer::Timestamp(Vec::new()),
            ColumnKind::Text => ColumnBuffer::Text(Vec::new()),
            ColumnKind::Float => ColumnBuffer::Float(Vec::new()),
        }
    }

    fn push(
        &mut self,
        column: SalesColumn,
        value: &str,
        line_index: usize,
    ) -> Result<(), ParserError> {
        match self {
            ColumnBuffer::Timestamp(values) => {
                values.push(parse_optional_timestamp(column, value, line_index)?)
            }
            ColumnBuffer::Text(values) => values.push(clean_optional(value)),
            ColumnBuffer::Float(values) => {
                values.push(parse_optional_f64(column, value, line_index)?)
            }
        }
        Ok(())
    }

    fn into_column(self, name: &str) -> Result<Column, ParserError> {
        let series = match self {
            ColumnBuffer::Timestamp(values) => Series::new(name.into(), values)
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
                .map_err(|err| ParserError::Frame {
                    message: format!("failed to cast '{name}' to datetime: {err}"),
                })?,
            ColumnBuffer::Text(values) => Series::new(name.into(), values),
            ColumnBuffer::Float(values) => Series::new(name.into(), values),
        };
        Ok(series.into())
    }
}

/// Reads a header-bearing sales CSV from disk and normalizes it.
pub fn normalize_file(path: &Path, mapping: ColumnMapping) -> Result<DataFrame, ParserError> {
    let content = fs::read_to_string(path).map_err(|source| ParserError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    normalize_csv(&content, mapping)
}

/// Renames the raw columns to the sales vocabulary and casts them to their
/// semantic types: `order_date` to a microsecond timestamp, the five numeric
/// measures to `f64`, everything else to strings. Empty cells become nulls.
pub fn normalize_csv(content: &str, mapping: ColumnMapping) -> Result<DataFrame, ParserError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let indices = resolve_columns(&headers, mapping)?;
    debug!(?headers, ?mapping, "resolved sales columns");

    let mut buffers: Vec<ColumnBuffer> = SalesColumn::ALL
        .iter()
        .map(|column| ColumnBuffer::for_kind(column.kind()))
        .collect();

    let mut record = StringRecord::new();
    let mut row = 0usize;
    while reader.read_record(&mut record)? {
        let line_index = record
            .position()
            .map(|pos| pos.line() as usize)
            .unwrap_or(row + 2);
        for (slot, column) in SalesColumn::ALL.iter().enumerate() {
            let raw = record.get(indices[slot]).unwrap_or_default();
            buffers[slot].push(*column, raw, line_index)?;
        }
        row += 1;
    }

    let columns = SalesColumn::ALL
        .iter()
        .zip(buffers)
        .map(|(column, buffer)| buffer.into_column(column.canonical_name()))
        .collect::<Result<Vec<Column>, ParserError>>()?;

    DataFrame::new(columns).map_err(|err| ParserError::Frame {
        message: err.to_string(),
    })
}

fn clean_optional(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub(crate) fn parse_optional_timestamp(
    column: SalesColumn,
    value: &str,
    line_index: usize,
) -> Result<Option<i64>, ParserError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(Some(dt.and_utc().timestamp_micros()));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(Some(dt.and_utc().timestamp_micros()));
            }
        }
    }
    Err(ParserError::DataRow {
        line_index,
        column: column.canonical_name(),
        message: format!("invalid timestamp '{trimmed}'"),
    })
}

pub(crate) fn parse_optional_f64(
    column: SalesColumn,
    value: &str,
    line_index: usize,
) -> Result<Option<f64>, ParserError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|err| ParserError::DataRow {
            line_index,
            column: column.canonical_name(),
            message: format!("failed to parse '{trimmed}' as float: {err}"),
        })
}
