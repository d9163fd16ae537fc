use chrono::NaiveDate;
use polars::prelude::*;
use tracing::info;

/// Aggregations over a feature-enriched sales frame. Recomputed every run
/// and never persisted.
#[derive(Debug, Clone)]
pub struct SalesReport {
    pub monthly: DataFrame,
    pub products: DataFrame,
    pub categories: DataFrame,
    pub cities: DataFrame,
    pub weekdays: DataFrame,
}

impl SalesReport {
    pub fn sections(&self) -> [(&'static str, &DataFrame); 5] {
        [
            ("Monthly sales", &self.monthly),
            ("Product-wise sales", &self.products),
            ("Sales by category", &self.categories),
            ("Sales by city", &self.cities),
            ("Sales by day of week", &self.weekdays),
        ]
    }
}

pub fn build_report(df: &DataFrame) -> PolarsResult<SalesReport> {
    let monthly = with_sales_growth(&monthly_sales(df)?)?;
    let report = SalesReport {
        monthly,
        products: product_sales(df)?,
        categories: category_sales(df)?,
        cities: city_sales(df)?,
        weekdays: day_of_week_sales(df)?,
    };
    info!(
        months = report.monthly.height(),
        products = report.products.height(),
        categories = report.categories.height(),
        cities = report.cities.height(),
        "sales report computed"
    );
    Ok(report)
}

/// `year, month, total_price, total_quantity` ordered by year then month.
pub fn monthly_sales(df: &DataFrame) -> PolarsResult<DataFrame> {
    df.clone()
        .lazy()
        .group_by([col("year"), col("month")])
        .agg([
            col("price_each").sum().alias("total_price"),
            col("quantity_ordered").sum().alias("total_quantity"),
        ])
        .sort(["year", "month"], SortMultipleOptions::default())
        .collect()
}

/// Adds the first-of-month `date` and the month-over-month `sales_growth`
/// percentage, `(total_price / previous total_price - 1) * 100`. The first
/// month has no predecessor and gets a null growth.
pub fn with_sales_growth(monthly: &DataFrame) -> PolarsResult<DataFrame> {
    let years = monthly.column("year")?.i32()?;
    let months = monthly.column("month")?.i32()?;
    let epoch = NaiveDate::default();

    let days: Vec<Option<i32>> = years
        .into_iter()
        .zip(months.into_iter())
        .map(|(year, month)| {
            let (year, month) = (year?, month?);
            let first = NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, 1)?;
            i32::try_from(first.signed_duration_since(epoch).num_days()).ok()
        })
        .collect();
    let date = Series::new("date".into(), days).cast(&DataType::Date)?;

    let mut frame = monthly.clone();
    frame.with_column(date)?;

    frame
        .lazy()
        .sort(
            ["date"],
            SortMultipleOptions::default().with_nulls_last(true),
        )
        .with_column(
            ((col("total_price") / col("total_price").shift(lit(1)) - lit(1.0)) * lit(100.0))
                .alias("sales_growth"),
        )
        .collect()
}

/// Total sales per product, best sellers first.
pub fn product_sales(df: &DataFrame) -> PolarsResult<DataFrame> {
    grouped_total(df, "product_name", "product_sales")?
        .sort(
            ["product_sales", "product_name"],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .collect()
}

pub fn category_sales(df: &DataFrame) -> PolarsResult<DataFrame> {
    grouped_total(df, "category", "category_sales")?
        .sort(["category"], SortMultipleOptions::default())
        .collect()
}

/// Total sales per city, highest first.
pub fn city_sales(df: &DataFrame) -> PolarsResult<DataFrame> {
    grouped_total(df, "city", "city_sales")?
        .sort(
            ["city_sales", "city"],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .collect()
}

/// Total sales per weekday. Ordered by the weekday label as text, so
/// Friday comes before Monday.
pub fn day_of_week_sales(df: &DataFrame) -> PolarsResult<DataFrame> {
    grouped_total(df, "day_of_week", "day_sales")?
        .sort(["day_of_week"], SortMultipleOptions::default())
        .collect()
}

fn grouped_total(df: &DataFrame, key: &str, alias: &str) -> PolarsResult<LazyFrame> {
    df.column(key)?;
    Ok(df
        .clone()
        .lazy()
        .group_by([col(key)])
        .agg([col("total_sales").sum().alias(alias)]))
}
