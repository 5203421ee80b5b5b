//! Training configuration.

use serde::{Deserialize, Serialize};

/// Default L2 penalty of the ridge regressor.
pub const DEFAULT_ALPHA: f64 = 10.0;

/// Default number of label columns at the end of each table.
pub const DEFAULT_LABEL_COUNT: usize = 14;

/// Configuration for fitting the multi-output ridge regressor.
///
/// # Example
///
/// ```rust,ignore
/// use forecast_learning::TrainingConfig;
///
/// let config = TrainingConfig::builder()
///     .alpha(1.0)
///     .label_count(7)
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Regularization strength shared by every output.
    /// Default: 10.0
    pub alpha: f64,

    /// Number of trailing columns holding labels.
    /// Default: 14
    pub label_count: usize,

    /// Whether to fit an intercept per output.
    /// Default: true
    pub fit_intercept: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            label_count: DEFAULT_LABEL_COUNT,
            fit_intercept: true,
        }
    }
}

impl TrainingConfig {
    /// Create a new configuration builder.
    pub fn builder() -> TrainingConfigBuilder {
        TrainingConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(ConfigValidationError::InvalidAlpha(self.alpha));
        }
        if self.label_count == 0 {
            return Err(ConfigValidationError::InvalidLabelCount(self.label_count));
        }
        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid alpha: {0} (must be finite and non-negative)")]
    InvalidAlpha(f64),

    #[error("Invalid label count: {0} (must be at least 1)")]
    InvalidLabelCount(usize),
}

/// Builder for [`TrainingConfig`].
#[derive(Debug, Default)]
pub struct TrainingConfigBuilder {
    alpha: Option<f64>,
    label_count: Option<usize>,
    fit_intercept: Option<bool>,
}

impl TrainingConfigBuilder {
    /// Set the L2 penalty.
    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = Some(alpha);
        self
    }

    /// Set the number of trailing label columns.
    pub fn label_count(mut self, count: usize) -> Self {
        self.label_count = Some(count);
        self
    }

    /// Enable or disable intercept fitting.
    pub fn fit_intercept(mut self, fit: bool) -> Self {
        self.fit_intercept = Some(fit);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValidationError`] if:
    /// - `alpha` is negative or not finite
    /// - `label_count` is zero
    pub fn build(self) -> Result<TrainingConfig, ConfigValidationError> {
        let defaults = TrainingConfig::default();
        let config = TrainingConfig {
            alpha: self.alpha.unwrap_or(defaults.alpha),
            label_count: self.label_count.unwrap_or(defaults.label_count),
            fit_intercept: self.fit_intercept.unwrap_or(defaults.fit_intercept),
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
        let config = TrainingConfig::default();
        assert_eq!(config.alpha, 10.0);
        assert_eq!(config.label_count, 14);
        assert!(config.fit_intercept);
    }

    #[test]
    fn test_builder() {
        let config = TrainingConfig::builder()
            .alpha(0.5)
            .label_count(3)
            .fit_intercept(false)
            .build()
            .unwrap();
        assert_eq!(config.alpha, 0.5);
        assert_eq!(config.label_count, 3);
        assert!(!config.fit_intercept);
    }

    #[test]
    fn test_invalid_alpha() {
        let result = TrainingConfig::builder().alpha(-1.0).build();
        assert!(result.unwrap_err().to_string().contains("alpha"));

        assert!(TrainingConfig::builder().alpha(f64::NAN).build().is_err());
    }

    #[test]
    fn test_invalid_label_count() {
        let result = TrainingConfig::builder().label_count(0).build();
        assert!(result.unwrap_err().to_string().contains("label count"));
    }
}
