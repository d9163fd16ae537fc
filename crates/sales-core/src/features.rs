use polars::prelude::*;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("row {row}: purchase address '{address}' has no city component")]
    MalformedAddress { row: usize, address: String },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Columns appended by [`derive_features`], in order.
pub const DERIVED_COLUMNS: [&str; 5] = ["month", "year", "total_sales", "city", "day_of_week"];

/// City component of a `street, city, state zip` address: the second
/// comma-separated token, trimmed.
pub fn extract_city(address: &str) -> Option<&str> {
    address.split(',').nth(1).map(str::trim)
}

/// Adds the calendar, revenue, city and weekday columns to a normalized
/// sales frame.
pub fn derive_features(df: DataFrame) -> Result<DataFrame, FeatureError> {
    let mut df = df
        .lazy()
        .with_columns([
            col("order_date")
                .dt()
                .month()
                .cast(DataType::Int32)
                .alias("month"),
            col("order_date")
                .dt()
                .year()
                .cast(DataType::Int32)
                .alias("year"),
            (col("quantity_ordered") * col("price_each")).alias("total_sales"),
        ])
        .collect()?;

    let cities = derive_cities(df.column("purchase_address")?.str()?)?;
    df.with_column(cities)?;

    let df = df
        .lazy()
        .with_column(
            col("order_date")
                .dt()
                .strftime("%A")
                .alias("day_of_week"),
        )
        .collect()?;

    debug!(rows = df.height(), "derived sales features");
    Ok(df)
}

fn derive_cities(addresses: &StringChunked) -> Result<Series, FeatureError> {
    let mut cities: Vec<Option<String>> = Vec::with_capacity(addresses.len());
    for (row, address) in addresses.into_iter().enumerate() {
        match address {
            None => cities.push(None),
            Some(address) => {
                let city = extract_city(address).ok_or_else(|| FeatureError::MalformedAddress {
                    row,
                    address: address.to_string(),
                })?;
                cities.push(Some(city.to_string()));
            }
        }
    }
    Ok(Series::new("city".into(), cities))
}
