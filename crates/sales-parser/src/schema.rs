use serde::{Deserialize, Serialize};

use crate::errors::ParserError;

/// Target vocabulary, in the order the raw export lays its columns out.
pub const SALES_COLUMNS: [&str; 11] = [
    "order_date",
    "order_id",
    "product_name",
    "product_ean",
    "category",
    "purchase_address",
    "quantity_ordered",
    "price_each",
    "cost_price",
    "turnover",
    "margin",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SalesColumn {
    OrderDate,
    OrderId,
    ProductName,
    ProductEan,
    Category,
    PurchaseAddress,
    QuantityOrdered,
    PriceEach,
    CostPrice,
    Turnover,
    Margin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Timestamp,
    Text,
    Float,
}

impl SalesColumn {
    pub const ALL: [SalesColumn; 11] = [
        SalesColumn::OrderDate,
        SalesColumn::OrderId,
        SalesColumn::ProductName,
        SalesColumn::ProductEan,
        SalesColumn::Category,
        SalesColumn::PurchaseAddress,
        SalesColumn::QuantityOrdered,
        SalesColumn::PriceEach,
        SalesColumn::CostPrice,
        SalesColumn::Turnover,
        SalesColumn::Margin,
    ];

    pub fn canonical_name(&self) -> &'static str {
        SALES_COLUMNS[*self as usize]
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            SalesColumn::OrderDate => ColumnKind::Timestamp,
            SalesColumn::OrderId
            | SalesColumn::ProductName
            | SalesColumn::ProductEan
            | SalesColumn::Category
            | SalesColumn::PurchaseAddress => ColumnKind::Text,
            SalesColumn::QuantityOrdered
            | SalesColumn::PriceEach
            | SalesColumn::CostPrice
            | SalesColumn::Turnover
            | SalesColumn::Margin => ColumnKind::Float,
        }
    }

    /// Normalized header spellings accepted in header mode, besides the
    /// canonical name itself.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            SalesColumn::OrderDate => &["date", "orderdatetime"],
            SalesColumn::OrderId => &["id", "ordernumber"],
            SalesColumn::ProductName => &["product"],
            SalesColumn::ProductEan => &["ean", "producteancode"],
            SalesColumn::Category => &["categorie", "catégorie", "productcategory"],
            SalesColumn::PurchaseAddress => &["address", "shippingaddress"],
            SalesColumn::QuantityOrdered => &["quantity", "qty"],
            SalesColumn::PriceEach => &["price", "unitprice"],
            SalesColumn::CostPrice => &["cost", "unitcost"],
            SalesColumn::Turnover => &["revenue"],
            SalesColumn::Margin => &["profit"],
        }
    }

    fn matches_header(&self, normalized: &str) -> bool {
        normalize_header(self.canonical_name()) == normalized
            || self.aliases().iter().any(|alias| *alias == normalized)
    }
}

/// How raw CSV headers are assigned to the sales vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnMapping {
    /// The Nth raw column becomes the Nth vocabulary name.
    #[default]
    Positional,
    /// Raw headers are matched by name, ignoring case, spacing and punctuation.
    Header,
}

/// Lowercases and keeps only alphanumeric characters, so `Order Date`,
/// `order_date` and `ORDER-DATE` all compare equal.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Returns, for every entry of [`SalesColumn::ALL`], the index of the raw
/// column that feeds it.
pub fn resolve_columns(
    headers: &[String],
    mapping: ColumnMapping,
) -> Result<[usize; 11], ParserError> {
    match mapping {
        ColumnMapping::Positional => {
            if headers.len() != SALES_COLUMNS.len() {
                return Err(ParserError::ColumnCount {
                    expected: SALES_COLUMNS.len(),
                    found: headers.len(),
                    headers: headers.to_vec(),
                });
            }
            Ok(std::array::from_fn(|idx| idx))
        }
        ColumnMapping::Header => {
            let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
            let mut indices = [0usize; 11];
            for (slot, column) in SalesColumn::ALL.iter().enumerate() {
                let mut found: Option<usize> = None;
                for (idx, header) in normalized.iter().enumerate() {
                    if !column.matches_header(header) {
                        continue;
                    }
                    if let Some(previous) = found {
                        return Err(ParserError::AmbiguousColumn {
                            column: column.canonical_name(),
                            first: headers[previous].clone(),
                            second: headers[idx].clone(),
                        });
                    }
                    found = Some(idx);
                }
                indices[slot] = found.ok_or_else(|| ParserError::MissingColumn {
                    column: column.canonical_name(),
                    headers: headers.to_vec(),
                })?;
            }
            Ok(indices)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalize_header_strips_case_and_punctuation() {
        assert_eq!(normalize_header(" Order Date "), "orderdate");
        assert_eq!(normalize_header("order_date"), "orderdate");
        assert_eq!(normalize_header("Catégorie"), "catégorie");
    }

    #[test]
    fn positional_mapping_rejects_short_header() {
        let err = resolve_columns(&headers(&["a", "b"]), ColumnMapping::Positional)
            .expect_err("two columns should not map");
        assert!(matches!(
            err,
            ParserError::ColumnCount {
                expected: 11,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn header_mapping_reports_missing_column() {
        let err = resolve_columns(&headers(&["Order Date", "Order ID"]), ColumnMapping::Header)
            .expect_err("most columns are missing");
        assert!(matches!(
            err,
            ParserError::MissingColumn {
                column: "product_name",
                ..
            }
        ));
    }

    #[test]
    fn header_mapping_rejects_duplicate_matches() {
        let mut names = SALES_COLUMNS.to_vec();
        names.push("Price");
        let err = resolve_columns(&headers(&names), ColumnMapping::Header)
            .expect_err("price_each is ambiguous");
        assert!(matches!(
            err,
            ParserError::AmbiguousColumn {
                column: "price_each",
                ..
            }
        ));
    }
}
