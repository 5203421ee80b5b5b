//! Configuration types for the feature engineering pipeline.
//!
//! This module provides configuration options using the builder pattern
//! for flexible and ergonomic pipeline setup.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default base directory used by processing steps.
pub const DEFAULT_BASE_DIR: &str = "/opt/ml/processing";

/// Date format of the raw extracts.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Strategy used by the [`DataSplitter`](crate::splitter::DataSplitter).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Per entity, the most recent `test_fraction` of rows become the test set.
    Chronological { test_fraction: f64 },
    /// Seeded shuffle of all rows, cut into train / validation / test.
    Shuffled {
        train_fraction: f64,
        validation_fraction: f64,
        seed: u64,
    },
}

impl Default for SplitStrategy {
    fn default() -> Self {
        Self::Chronological { test_fraction: 0.2 }
    }
}

/// Configuration for the feature engineering pipeline.
///
/// Use [`FeatureConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use forecast_processing::config::FeatureConfig;
///
/// let config = FeatureConfig::builder()
///     .target_column("occupancy")
///     .lags(vec![1, 7])
///     .horizon(14)
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Name of the date column in the raw extracts.
    /// Default: "Date"
    pub date_column: String,

    /// Format of the date column, in `chrono` strftime syntax.
    /// Default: "%Y-%m-%d"
    pub date_format: String,

    /// Columns identifying one entity (site). Lags and targets are computed
    /// within these groups only.
    /// Default: ["location_id", "location_parking_type_id"]
    pub group_columns: Vec<String>,

    /// Numeric observation columns, forward filled per group.
    /// Default: ["occupancy", "capacity"]
    pub feature_columns: Vec<String>,

    /// Column to forecast. Must be one of `feature_columns`.
    /// Default: "occupancy"
    pub target_column: String,

    /// Lags (in days) of the target column added as features.
    /// Default: [1, 2, 3, 7, 14]
    pub lags: Vec<usize>,

    /// Number of days ahead to forecast; one label column per day.
    /// Default: 14
    pub horizon: usize,

    /// Whether the raw extracts carry a header row.
    /// Default: true
    pub has_header: bool,

    /// Date whose rows form the prediction partition.
    /// If None, the latest date in the data is used.
    /// Default: None
    pub predict_date: Option<NaiveDate>,

    /// How the training partition is split into train/test.
    /// Default: chronological, 20% test per entity
    pub split: SplitStrategy,

    /// Base directory for downloads and step outputs.
    /// Default: "/opt/ml/processing"
    pub base_dir: PathBuf,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            date_column: "Date".to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            group_columns: vec![
                "location_id".to_string(),
                "location_parking_type_id".to_string(),
            ],
            feature_columns: vec!["occupancy".to_string(), "capacity".to_string()],
            target_column: "occupancy".to_string(),
            lags: vec![1, 2, 3, 7, 14],
            horizon: 14,
            has_header: true,
            predict_date: None,
            split: SplitStrategy::default(),
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
        }
    }
}

impl FeatureConfig {
    /// Create a new configuration builder.
    pub fn builder() -> FeatureConfigBuilder {
        FeatureConfigBuilder::default()
    }

    /// Names of the lag columns, in lag order.
    pub fn lag_column_names(&self) -> Vec<String> {
        self.lags
            .iter()
            .map(|lag| lag_column_name(&self.target_column, *lag))
            .collect()
    }

    /// Names of the multistep label columns, nearest day first.
    pub fn label_column_names(&self) -> Vec<String> {
        (1..=self.horizon)
            .map(|step| multistep_column_name(&self.target_column, step))
            .collect()
    }

    /// All raw columns expected in an extract, in file order.
    pub fn raw_columns(&self) -> Vec<String> {
        let mut columns = Vec::with_capacity(self.group_columns.len() + self.feature_columns.len() + 1);
        columns.push(self.date_column.clone());
        columns.extend(self.group_columns.iter().cloned());
        columns.extend(self.feature_columns.iter().cloned());
        columns
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.group_columns.is_empty() {
            return Err(ConfigValidationError::MissingColumns("group_columns"));
        }
        if self.feature_columns.is_empty() {
            return Err(ConfigValidationError::MissingColumns("feature_columns"));
        }
        if !self.feature_columns.contains(&self.target_column) {
            return Err(ConfigValidationError::TargetNotAFeature(
                self.target_column.clone(),
            ));
        }
        if self.horizon == 0 {
            return Err(ConfigValidationError::InvalidHorizon(self.horizon));
        }
        if self.lags.iter().any(|lag| *lag == 0) {
            return Err(ConfigValidationError::InvalidLag(0));
        }

        match self.split {
            SplitStrategy::Chronological { test_fraction } => {
                if !(0.0..1.0).contains(&test_fraction) {
                    return Err(ConfigValidationError::InvalidFraction {
                        field: "test_fraction".to_string(),
                        value: test_fraction,
                    });
                }
            }
            SplitStrategy::Shuffled {
                train_fraction,
                validation_fraction,
                ..
            } => {
                if !(0.0..=1.0).contains(&train_fraction)
                    || !(0.0..=1.0).contains(&validation_fraction)
                    || train_fraction + validation_fraction > 1.0
                {
                    return Err(ConfigValidationError::InvalidFraction {
                        field: "train_fraction + validation_fraction".to_string(),
                        value: train_fraction + validation_fraction,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Name of the lag column for `column` shifted by `lag` days.
pub fn lag_column_name(column: &str, lag: usize) -> String {
    format!("{column}_lag_{lag}")
}

/// Name of the label column holding `column` `step` days ahead.
pub fn multistep_column_name(column: &str, step: usize) -> String {
    format!("{column}_{step}_day_ahead")
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("At least one entry is required in '{0}'")]
    MissingColumns(&'static str),

    #[error("Target column '{0}' must be listed in feature_columns")]
    TargetNotAFeature(String),

    #[error("Invalid horizon: {0} (must be at least 1)")]
    InvalidHorizon(usize),

    #[error("Invalid lag: {0} (must be at least 1)")]
    InvalidLag(usize),

    #[error("Invalid fraction for '{field}': {value}")]
    InvalidFraction { field: String, value: f64 },
}

/// Builder for [`FeatureConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct FeatureConfigBuilder {
    date_column: Option<String>,
    date_format: Option<String>,
    group_columns: Option<Vec<String>>,
    feature_columns: Option<Vec<String>>,
    target_column: Option<String>,
    lags: Option<Vec<usize>>,
    horizon: Option<usize>,
    has_header: Option<bool>,
    predict_date: Option<NaiveDate>,
    split: Option<SplitStrategy>,
    base_dir: Option<PathBuf>,
}

impl FeatureConfigBuilder {
    /// Set the date column name.
    pub fn date_column(mut self, column: impl Into<String>) -> Self {
        self.date_column = Some(column.into());
        self
    }

    /// Set the date format (strftime syntax).
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }

    /// Set the entity key columns.
    pub fn group_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set the numeric observation columns.
    pub fn feature_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set the column to forecast.
    pub fn target_column(mut self, column: impl Into<String>) -> Self {
        self.target_column = Some(column.into());
        self
    }

    /// Set the lags of the target used as features.
    pub fn lags(mut self, lags: Vec<usize>) -> Self {
        self.lags = Some(lags);
        self
    }

    /// Set the forecast horizon in days.
    pub fn horizon(mut self, horizon: usize) -> Self {
        self.horizon = Some(horizon);
        self
    }

    /// Declare whether raw extracts have a header row.
    pub fn has_header(mut self, has_header: bool) -> Self {
        self.has_header = Some(has_header);
        self
    }

    /// Pin the prediction date instead of using the latest one.
    pub fn predict_date(mut self, date: NaiveDate) -> Self {
        self.predict_date = Some(date);
        self
    }

    /// Set the train/test split strategy.
    pub fn split(mut self, split: SplitStrategy) -> Self {
        self.split = Some(split);
        self
    }

    /// Set the base directory for downloads and outputs.
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(path.into());
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `FeatureConfig` or an error if validation fails.
    pub fn build(self) -> Result<FeatureConfig, ConfigValidationError> {
        let defaults = FeatureConfig::default();
        let config = FeatureConfig {
            date_column: self.date_column.unwrap_or(defaults.date_column),
            date_format: self.date_format.unwrap_or(defaults.date_format),
            group_columns: self.group_columns.unwrap_or(defaults.group_columns),
            feature_columns: self.feature_columns.unwrap_or(defaults.feature_columns),
            target_column: self.target_column.unwrap_or(defaults.target_column),
            lags: self.lags.unwrap_or(defaults.lags),
            horizon: self.horizon.unwrap_or(defaults.horizon),
            has_header: self.has_header.unwrap_or(defaults.has_header),
            predict_date: self.predict_date,
            split: self.split.unwrap_or_default(),
            base_dir: self.base_dir.unwrap_or(defaults.base_dir),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FeatureConfig::default();
        assert_eq!(config.date_column, "Date");
        assert_eq!(config.horizon, 14);
        assert_eq!(config.target_column, "occupancy");
        assert_eq!(config.split, SplitStrategy::Chronological { test_fraction: 0.2 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_column_names() {
        let config = FeatureConfig::builder()
            .lags(vec![1, 7])
            .horizon(3)
            .build()
            .unwrap();

        assert_eq!(
            config.lag_column_names(),
            vec!["occupancy_lag_1", "occupancy_lag_7"]
        );
        assert_eq!(
            config.label_column_names(),
            vec![
                "occupancy_1_day_ahead",
                "occupancy_2_day_ahead",
                "occupancy_3_day_ahead"
            ]
        );
        assert_eq!(
            config.raw_columns(),
            vec![
                "Date",
                "location_id",
                "location_parking_type_id",
                "occupancy",
                "capacity"
            ]
        );
    }

    #[test]
    fn test_validation_target_must_be_feature() {
        let result = FeatureConfig::builder()
            .feature_columns(["capacity"])
            .build();

        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::TargetNotAFeature(_)
        ));
    }

    #[test]
    fn test_validation_zero_horizon_and_lag() {
        assert!(matches!(
            FeatureConfig::builder().horizon(0).build().unwrap_err(),
            ConfigValidationError::InvalidHorizon(0)
        ));
        assert!(matches!(
            FeatureConfig::builder().lags(vec![1, 0]).build().unwrap_err(),
            ConfigValidationError::InvalidLag(0)
        ));
    }

    #[test]
    fn test_validation_split_fractions() {
        let result = FeatureConfig::builder()
            .split(SplitStrategy::Shuffled {
                train_fraction: 0.8,
                validation_fraction: 0.3,
                seed: 1,
            })
            .build();
        assert!(result.is_err());

        let result = FeatureConfig::builder()
            .split(SplitStrategy::Chronological { test_fraction: 1.0 })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "date_column": "day",
            "date_format": "%d/%m/%Y",
            "group_columns": ["site"],
            "feature_columns": ["load"],
            "target_column": "load",
            "lags": [1],
            "horizon": 2,
            "has_header": false,
            "predict_date": "2024-03-01",
            "split": {"kind": "shuffled", "train_fraction": 0.7, "validation_fraction": 0.15, "seed": 42},
            "base_dir": "/tmp/processing"
        }"#;

        let config: FeatureConfig = serde_json::from_str(json).expect("valid config json");
        assert_eq!(config.group_columns, vec!["site"]);
        assert_eq!(
            config.predict_date,
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert!(matches!(config.split, SplitStrategy::Shuffled { seed: 42, .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FeatureConfig = serde_json::from_str(r#"{"horizon": 7}"#).unwrap();
        assert_eq!(config.horizon, 7);
        assert_eq!(config.lags, vec![1, 2, 3, 7, 14]);
        assert_eq!(config.target_column, "occupancy");
    }
}
