pub mod errors;
pub mod normalize;
pub mod schema;

pub use errors::ParserError;
pub use normalize::{normalize_csv, normalize_file};
pub use schema::{normalize_header, resolve_columns, ColumnKind, ColumnMapping, SalesColumn, SALES_COLUMNS};
