//! Shared utilities for the feature engineering pipeline.
//!
//! This module contains the column accessors and date helpers used across
//! the builder, the feature transforms and the splitter.

use crate::error::{ProcessingError, Result};
use chrono::NaiveDate;
use polars::prelude::*;

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

// =============================================================================
// Column Accessors
// =============================================================================

/// Get a column as a materialized series, mapping a miss to `ColumnNotFound`.
pub fn series<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series> {
    df.column(name)
        .map(|col| col.as_materialized_series())
        .map_err(|_| ProcessingError::ColumnNotFound(name.to_string()))
}

/// Read a numeric column into `Option<f64>` values.
///
/// String columns are rejected rather than parsed, so a mistyped extract
/// fails loudly before anything is fitted on it.
pub fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = series(df, name)?;
    if !is_numeric_dtype(series.dtype()) && series.dtype() != &DataType::Null {
        return Err(ProcessingError::TypeConversionFailed {
            column: name.to_string(),
            target_type: "Float64".to_string(),
            reason: format!("column has non-numeric type {}", series.dtype()),
        });
    }

    let casted = series.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

/// Read any column as display strings, preserving nulls.
///
/// Integer identifiers keep their integer rendering ("17", not "17.0").
pub fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = series(df, name)?;
    let casted = series.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}

/// Parse the date column into `NaiveDate`s.
///
/// Accepts a string column in `format`, or a polars `Date` column.
pub fn date_values(df: &DataFrame, name: &str, format: &str) -> Result<Vec<NaiveDate>> {
    let series = series(df, name)?;

    if series.dtype() == &DataType::Date {
        let epoch = unix_epoch();
        let days = series.cast(&DataType::Int32)?;
        return days
            .i32()?
            .into_iter()
            .map(|value| {
                value
                    .and_then(|days| epoch.checked_add_signed(chrono::Duration::days(days.into())))
                    .ok_or_else(|| ProcessingError::InvalidDate {
                        column: name.to_string(),
                        value: "null".to_string(),
                        format: format.to_string(),
                    })
            })
            .collect();
    }

    string_values(df, name)?
        .into_iter()
        .map(|value| {
            let raw = value.unwrap_or_default();
            parse_date(raw.trim(), format).ok_or_else(|| ProcessingError::InvalidDate {
                column: name.to_string(),
                value: raw.clone(),
                format: format.to_string(),
            })
        })
        .collect()
}

/// Parse a date, tolerating a trailing time component ("2024-01-31 00:00:00").
pub fn parse_date(value: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, format).ok().or_else(|| {
        value
            .split_whitespace()
            .next()
            .and_then(|date_part| NaiveDate::parse_from_str(date_part, format).ok())
    })
}

/// Format a date the way the raw extracts store it.
pub fn format_date(date: NaiveDate, format: &str) -> String {
    date.format(format).to_string()
}

fn unix_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Build a composite entity key from the group columns of one row.
pub fn entity_key(parts: &[Option<String>]) -> String {
    parts
        .iter()
        .map(|part| part.as_deref().unwrap_or("missing"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Read the group columns and return one composite key per row.
pub fn entity_keys(df: &DataFrame, group_columns: &[String]) -> Result<Vec<String>> {
    let columns = group_columns
        .iter()
        .map(|name| string_values(df, name))
        .collect::<Result<Vec<_>>>()?;

    Ok((0..df.height())
        .map(|row| {
            let parts: Vec<Option<String>> =
                columns.iter().map(|column| column[row].clone()).collect();
            entity_key(&parts)
        })
        .collect())
}

/// Gather rows of a frame by index, in the given order.
pub fn take_rows(df: &DataFrame, indices: &[usize]) -> Result<DataFrame> {
    let idx: Vec<IdxSize> = indices.iter().map(|i| *i as IdxSize).collect();
    let idx = IdxCa::from_vec("idx".into(), idx);
    Ok(df.take(&idx)?)
}
