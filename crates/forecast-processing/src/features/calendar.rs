//! Calendar features and their cyclic encodings.
//!
//! `weekday` follows the Monday = 0 … Sunday = 6 convention and `month` runs
//! 1–12. The cyclic encoders map them onto the unit circle so that Sunday
//! sits next to Monday and December next to January.

use crate::config::FeatureConfig;
use crate::error::Result;
use crate::utils::{date_values, numeric_values};
use chrono::Datelike;
use polars::prelude::*;
use std::f64::consts::PI;

pub const WEEKDAY_COLUMN: &str = "weekday";
pub const MONTH_COLUMN: &str = "month";

const DAYS_PER_WEEK: f64 = 7.0;
const MONTHS_PER_YEAR: f64 = 12.0;

/// Names of the four encoded columns, in the order they are appended.
pub fn cyclic_column_names() -> Vec<String> {
    ["weekday_Sin", "weekday_Cos", "month_Sin", "month_Cos"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Derive `weekday` and `month` from the date column.
pub fn add_calendar_columns(df: &mut DataFrame, config: &FeatureConfig) -> Result<()> {
    let dates = date_values(df, &config.date_column, &config.date_format)?;

    let weekday: Vec<f64> = dates
        .iter()
        .map(|d| d.weekday().num_days_from_monday() as f64)
        .collect();
    let month: Vec<f64> = dates.iter().map(|d| d.month() as f64).collect();

    df.with_column(Series::new(WEEKDAY_COLUMN.into(), weekday))?;
    df.with_column(Series::new(MONTH_COLUMN.into(), month))?;
    Ok(())
}

/// Replace `weekday` with `weekday_Sin` / `weekday_Cos`.
pub fn cyclic_encode_weekday(df: &mut DataFrame) -> Result<()> {
    cyclic_encode(df, WEEKDAY_COLUMN, DAYS_PER_WEEK)
}

/// Replace `month` with `month_Sin` / `month_Cos`.
pub fn cyclic_encode_month(df: &mut DataFrame) -> Result<()> {
    cyclic_encode(df, MONTH_COLUMN, MONTHS_PER_YEAR)
}

fn cyclic_encode(df: &mut DataFrame, column: &str, period: f64) -> Result<()> {
    let values = numeric_values(df, column)?;

    let angle = |v: &Option<f64>| v.map(|v| 2.0 * PI * v / period);
    let sin: Vec<Option<f64>> = values.iter().map(|v| angle(v).map(f64::sin)).collect();
    let cos: Vec<Option<f64>> = values.iter().map(|v| angle(v).map(f64::cos)).collect();

    df.with_column(Series::new(format!("{column}_Sin").as_str().into(), sin))?;
    df.with_column(Series::new(format!("{column}_Cos").as_str().into(), cos))?;
    df.drop_in_place(column)?;
    Ok(())
}
