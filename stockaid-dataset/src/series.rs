//! Per-ticker time series extracted from a history frame.

use chrono::NaiveDate;
use polars::prelude::DataFrame;
use stockaid_core::table::{read_dates, read_floats, ColumnType, TableSchema};
use stockaid_core::ApiError;

/// Dated observations, strictly increasing by date.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl TimeSeries {
    /// Build from `(date, value)` pairs: sorted by date, keeping the first
    /// row of any repeated date.
    pub fn from_pairs(mut pairs: Vec<(NaiveDate, f64)>) -> Self {
        pairs.sort_by_key(|(d, _)| *d);
        pairs.dedup_by_key(|(d, _)| *d);
        let (dates, values) = pairs.into_iter().unzip();
        Self { dates, values }
    }

    /// Read the `date` column and `value_column` from a history frame.
    pub fn from_frame(df: &DataFrame, value_column: &str) -> Result<Self, ApiError> {
        TableSchema::new(&[("date", ColumnType::Date)]).validate(df)?;
        if df.column(value_column).is_err() {
            return Err(ApiError::DataFormat(format!(
                "history has no '{value_column}' column"
            )));
        }
        let dates = read_dates(df, "date")?;
        let values = read_floats(df, value_column)?;
        Ok(Self::from_pairs(dates.into_iter().zip(values).collect()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn last(&self) -> Option<(NaiveDate, f64)> {
        Some((*self.dates.last()?, *self.values.last()?))
    }
}
