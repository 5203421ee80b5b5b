//! Train / predict partition by date.

use crate::config::FeatureConfig;
use crate::error::{ProcessingError, Result};
use crate::utils::{date_values, numeric_values, take_rows};
use chrono::NaiveDate;
use polars::prelude::*;
use tracing::info;

/// Rows available for fitting and rows to forecast from.
#[derive(Debug, Clone)]
pub struct DatePartition {
    pub predict_date: NaiveDate,
    /// Rows strictly before `predict_date` with complete lags and labels.
    pub train: DataFrame,
    /// Rows on `predict_date` with complete lags. Labels are not required.
    pub predict: DataFrame,
}

/// Split an engineered frame into its training and prediction partitions.
///
/// `predict_date` defaults to the latest date present. Row order is kept.
pub fn partition_by_date(
    df: &DataFrame,
    config: &FeatureConfig,
    predict_date: Option<NaiveDate>,
) -> Result<DatePartition> {
    let dates = date_values(df, &config.date_column, &config.date_format)?;
    let predict_date = match predict_date {
        Some(date) => date,
        None => dates.iter().max().copied().ok_or_else(|| {
            ProcessingError::EmptyData("no rows to partition".to_string())
        })?,
    };

    let mut inputs = config.feature_columns.clone();
    inputs.extend(config.lag_column_names());
    let inputs_complete = complete_rows(df, &inputs)?;
    let labels_complete = complete_rows(df, &config.label_column_names())?;

    let mut train_rows = Vec::new();
    let mut predict_rows = Vec::new();
    for (row, date) in dates.iter().enumerate() {
        if !inputs_complete[row] {
            continue;
        }
        if *date < predict_date && labels_complete[row] {
            train_rows.push(row);
        } else if *date == predict_date {
            predict_rows.push(row);
        }
    }

    info!(
        "Partitioned at {}: {} training rows, {} rows to predict",
        predict_date,
        train_rows.len(),
        predict_rows.len()
    );

    Ok(DatePartition {
        predict_date,
        train: take_rows(df, &train_rows)?,
        predict: take_rows(df, &predict_rows)?,
    })
}

/// `true` where every listed column is present and not NaN.
fn complete_rows(df: &DataFrame, columns: &[String]) -> Result<Vec<bool>> {
    let mut complete = vec![true; df.height()];
    for name in columns {
        for (row, value) in numeric_values(df, name)?.into_iter().enumerate() {
            if !matches!(value, Some(v) if !v.is_nan()) {
                complete[row] = false;
            }
        }
    }
    Ok(complete)
}
