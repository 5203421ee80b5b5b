//! Per-entity forward fill on a daily calendar.
//!
//! Each entity's observations are sorted by date and re-indexed onto every
//! day between its first and last observation. Inserted days and missing
//! feature values take the most recent earlier value of the same entity.
//! Values never flow from one entity into another.

use crate::config::FeatureConfig;
use crate::error::Result;
use crate::features::grouping::GroupIndex;
use crate::utils::{date_values, format_date, numeric_values, string_values};
use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Forward-fill imputer for grouped daily series.
pub struct ForwardFillImputer<'a> {
    config: &'a FeatureConfig,
}

impl<'a> ForwardFillImputer<'a> {
    pub fn new(config: &'a FeatureConfig) -> Self {
        Self { config }
    }

    /// Re-index every entity to a contiguous daily calendar and forward fill
    /// the feature columns within the entity.
    ///
    /// The output has the group columns, the date column (formatted with the
    /// configured date format) and the feature columns, sorted by entity then
    /// date. Leading gaps of an entity stay null.
    pub fn impute(&self, df: &DataFrame) -> Result<DataFrame> {
        let config = self.config;
        let dates = date_values(df, &config.date_column, &config.date_format)?;
        let group_values = config
            .group_columns
            .iter()
            .map(|name| string_values(df, name))
            .collect::<Result<Vec<_>>>()?;
        let features = config
            .feature_columns
            .iter()
            .map(|name| numeric_values(df, name))
            .collect::<Result<Vec<_>>>()?;

        let index = GroupIndex::from_parts(&group_values, &dates);

        let mut out_groups: Vec<Vec<Option<String>>> = vec![Vec::new(); group_values.len()];
        let mut out_dates: Vec<String> = Vec::new();
        let mut out_features: Vec<Vec<Option<f64>>> = vec![Vec::new(); features.len()];
        let mut inserted_days = 0usize;

        for group in index.groups() {
            // Last observation wins for duplicated dates.
            let mut by_date: BTreeMap<NaiveDate, usize> = BTreeMap::new();
            for &row in &group.rows {
                if by_date.insert(dates[row], row).is_some() {
                    warn!(
                        "Duplicate date {} for entity {}, keeping the last row",
                        dates[row], group.key
                    );
                }
            }

            let (Some(first), Some(last)) = (
                by_date.keys().next().copied(),
                by_date.keys().next_back().copied(),
            ) else {
                continue;
            };
            let key_row = group.rows[0];

            let mut carried: Vec<Option<f64>> = vec![None; features.len()];
            let mut day = first;
            while day <= last {
                let observed = by_date.get(&day).copied();
                if observed.is_none() {
                    inserted_days += 1;
                }

                for (f, column) in features.iter().enumerate() {
                    if let Some(value) = observed.and_then(|row| column[row]).filter(|v| !v.is_nan()) {
                        carried[f] = Some(value);
                    }
                    out_features[f].push(carried[f]);
                }
                for (g, column) in group_values.iter().enumerate() {
                    out_groups[g].push(column[key_row].clone());
                }
                out_dates.push(format_date(day, &config.date_format));

                day += Duration::days(1);
            }
        }

        debug!(
            "Forward fill re-indexed {} entities, inserted {} missing days",
            index.len(),
            inserted_days
        );

        let mut columns: Vec<Column> = Vec::with_capacity(config.raw_columns().len());
        for (name, values) in config.group_columns.iter().zip(out_groups) {
            columns.push(Column::new(name.as_str().into(), values));
        }
        columns.push(Column::new(config.date_column.as_str().into(), out_dates));
        for (name, values) in config.feature_columns.iter().zip(out_features) {
            columns.push(Column::new(name.as_str().into(), values));
        }

        let result = DataFrame::new(columns)?;
        info!(
            "Forward fill: {} rows in, {} rows out",
            df.height(),
            result.height()
        );
        Ok(result)
    }
}
