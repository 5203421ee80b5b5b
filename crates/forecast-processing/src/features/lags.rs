//! Lag features and multistep targets.

use crate::config::{FeatureConfig, lag_column_name, multistep_column_name};
use crate::error::Result;
use crate::features::grouping::GroupIndex;
use crate::utils::numeric_values;
use polars::prelude::*;
use tracing::debug;

/// Add `{column}_lag_{k}` for every `k` in `lags`, shifted within each entity.
pub fn add_lagged_features(
    df: &mut DataFrame,
    config: &FeatureConfig,
    column: &str,
    lags: &[usize],
) -> Result<Vec<String>> {
    let index = GroupIndex::build(df, config)?;
    let values = numeric_values(df, column)?;

    let mut added = Vec::with_capacity(lags.len());
    for &lag in lags {
        let name = lag_column_name(column, lag);
        let shifted = index.shift(&values, lag as isize);
        df.with_column(Series::new(name.as_str().into(), shifted))?;
        added.push(name);
    }

    debug!("Added {} lag column(s) for '{}'", added.len(), column);
    Ok(added)
}

/// Add `{column}_{k}_day_ahead` for `k = 1..=multisteps`, shifted within each entity.
pub fn add_multistep_target(
    df: &mut DataFrame,
    config: &FeatureConfig,
    column: &str,
    multisteps: usize,
) -> Result<Vec<String>> {
    let index = GroupIndex::build(df, config)?;
    let values = numeric_values(df, column)?;

    let mut added = Vec::with_capacity(multisteps);
    for step in 1..=multisteps {
        let name = multistep_column_name(column, step);
        let shifted = index.shift(&values, -(step as isize));
        df.with_column(Series::new(name.as_str().into(), shifted))?;
        added.push(name);
    }

    debug!("Added {} target column(s) for '{}'", added.len(), column);
    Ok(added)
}
