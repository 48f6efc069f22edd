//! Table schemas exchanged between the cache and its consumers.
//!
//! Payloads are `polars` DataFrames. Each registered API declares the columns
//! it guarantees; the cache validates every fetched frame against that
//! declaration before storing it. Extra columns are allowed.

use chrono::NaiveDate;
use polars::prelude::*;
use thiserror::Error;

use crate::error::ApiError;

/// Logical column types used in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Date,
    Float,
    Text,
}

impl ColumnType {
    fn dtype(self) -> DataType {
        match self {
            ColumnType::Date => DataType::Date,
            ColumnType::Float => DataType::Float64,
            ColumnType::Text => DataType::String,
        }
    }
}

/// Required columns of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<(String, ColumnType)>,
}

impl TableSchema {
    pub fn new(columns: &[(&str, ColumnType)]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(name, ty)| (name.to_string(), *ty))
                .collect(),
        }
    }

    /// Schema with no required columns.
    pub fn any() -> Self {
        Self { columns: vec![] }
    }

    /// Daily price history: one row per date, sorted ascending.
    pub fn price_history() -> Self {
        Self::new(&[
            ("date", ColumnType::Date),
            ("open", ColumnType::Float),
            ("high", ColumnType::Float),
            ("low", ColumnType::Float),
            ("close", ColumnType::Float),
            ("volume", ColumnType::Float),
        ])
    }

    /// Index membership: one row per constituent.
    pub fn index_members() -> Self {
        Self::new(&[("symbol", ColumnType::Text)])
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(n, t)| (n.as_str(), *t))
    }

    /// Validate a DataFrame against this schema.
    pub fn validate(&self, df: &DataFrame) -> Result<(), SchemaError> {
        for (name, ty) in &self.columns {
            let column = df
                .column(name)
                .map_err(|_| SchemaError::MissingColumn(name.clone()))?;
            let expected = ty.dtype();
            if column.dtype() != &expected {
                return Err(SchemaError::TypeMismatch {
                    column: name.clone(),
                    expected,
                    actual: column.dtype().clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}

impl From<SchemaError> for ApiError {
    fn from(e: SchemaError) -> Self {
        ApiError::DataFormat(e.to_string())
    }
}

// ── Column helpers ──────────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Build a `Date` column from calendar dates.
pub fn date_column(name: &str, dates: &[NaiveDate]) -> PolarsResult<Column> {
    let days: Vec<i32> = dates
        .iter()
        .map(|d| (*d - epoch()).num_days() as i32)
        .collect();
    Column::new(name.into(), days).cast(&DataType::Date)
}

/// Read a `Date` column back into calendar dates. Nulls are an error.
pub fn read_dates(df: &DataFrame, name: &str) -> Result<Vec<NaiveDate>, ApiError> {
    let ca = df.column(name)?.date()?;
    let epoch = epoch();
    (0..df.height())
        .map(|i| {
            ca.get(i)
                .map(|days| epoch + chrono::Duration::days(days as i64))
                .ok_or_else(|| ApiError::DataFormat(format!("null {name} at row {i}")))
        })
        .collect()
}

/// Read a numeric column as `f64`, casting integer columns. Nulls become NaN.
pub fn read_floats(df: &DataFrame, name: &str) -> Result<Vec<f64>, ApiError> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    let ca = column.f64()?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// Read a string column. Nulls become empty strings.
pub fn read_strings(df: &DataFrame, name: &str) -> Result<Vec<String>, ApiError> {
    let ca = df.column(name)?.str()?;
    Ok(ca
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}
