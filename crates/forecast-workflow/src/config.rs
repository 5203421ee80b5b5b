//! Workflow configuration.
//!
//! Everything a pipeline definition needs to be rendered: names, the data
//! manifest, hyperparameters and the registration gate. Loaded from a JSON
//! file; missing fields take their defaults.

use crate::error::{Result, WorkflowError};
use forecast_processing::FeatureConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// MSE at or below which a model is registered.
pub const DEFAULT_MSE_THRESHOLD: f64 = 6.0;

/// Configuration for [`get_pipeline`](crate::definition::get_pipeline) and the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Default: "ForecastPipeline"
    pub pipeline_name: String,

    /// Prefix of step job names.
    /// Default: "Forecast"
    pub base_job_prefix: String,

    /// Registry group receiving approved models.
    /// Default: "ForecastModelPackageGroup"
    pub model_package_group_name: String,

    /// Directory holding one sub-directory per execution.
    /// Default: "pipeline-runs"
    pub artifact_root: PathBuf,

    /// Root of the local model registry.
    /// Default: "model-registry"
    pub registry_root: PathBuf,

    /// Data manifest read by the preprocess step.
    /// Default: "dataManifest.json"
    pub data_manifest: PathBuf,

    /// Root directory with one sub-directory per bucket. When None, the
    /// preprocess step resolves buckets under the current directory.
    pub store_root: Option<PathBuf>,

    /// Registration gate on `regression_metrics.mse.value`.
    /// Default: 6.0
    pub mse_threshold: f64,

    /// Ridge penalty passed to the training step.
    /// Default: 10.0
    pub alpha: f64,

    /// Approval status given to registered models.
    /// Default: "Approved"
    pub approval_status: String,

    /// Default: ["text/csv"]
    pub content_types: Vec<String>,

    /// Default: ["text/csv"]
    pub response_types: Vec<String>,

    /// Feature engineering settings of the preprocess step. The horizon
    /// doubles as the label count of training and evaluation.
    pub features: FeatureConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            pipeline_name: "ForecastPipeline".to_string(),
            base_job_prefix: "Forecast".to_string(),
            model_package_group_name: "ForecastModelPackageGroup".to_string(),
            artifact_root: PathBuf::from("pipeline-runs"),
            registry_root: PathBuf::from("model-registry"),
            data_manifest: PathBuf::from("dataManifest.json"),
            store_root: None,
            mse_threshold: DEFAULT_MSE_THRESHOLD,
            alpha: forecast_learning::config::DEFAULT_ALPHA,
            approval_status: "Approved".to_string(),
            content_types: vec!["text/csv".to_string()],
            response_types: vec!["text/csv".to_string()],
            features: FeatureConfig::default(),
        }
    }
}

impl WorkflowConfig {
    /// Read a configuration file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            WorkflowError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Number of label columns written by preprocessing.
    pub fn label_count(&self) -> usize {
        self.features.horizon
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline_name.trim().is_empty() {
            return Err(WorkflowError::InvalidConfig("pipeline_name is empty".to_string()));
        }
        if self.model_package_group_name.trim().is_empty() {
            return Err(WorkflowError::InvalidConfig(
                "model_package_group_name is empty".to_string(),
            ));
        }
        if !self.mse_threshold.is_finite() {
            return Err(WorkflowError::InvalidConfig(format!(
                "mse_threshold must be finite, got {}",
                self.mse_threshold
            )));
        }
        self.approval_status
            .parse::<crate::registry::ApprovalStatus>()
            .map_err(WorkflowError::InvalidConfig)?;
        forecast_learning::TrainingConfig::builder()
            .alpha(self.alpha)
            .label_count(self.label_count())
            .build()
            .map_err(|e| WorkflowError::InvalidConfig(e.to_string()))?;
        self.features
            .validate()
            .map_err(|e| WorkflowError::InvalidConfig(e.to_string()))
    }
}
