//! Error types for the workflow crate.

use forecast_learning::LearningError;
use forecast_processing::ProcessingError;
use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for pipeline definition and execution.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The pipeline definition is malformed (duplicate names, dangling references).
    #[error("Invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    /// A property reference could not be resolved at run time.
    #[error("Cannot resolve {reference}: {reason}")]
    UnresolvedProperty { reference: String, reason: String },

    /// A JSON path did not lead to a number in a property file.
    #[error("Property file '{file}' has no numeric value at '{path}'")]
    PropertyNotFound { file: String, path: String },

    /// Model registry operation failed.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Execution was cancelled.
    #[error("Pipeline execution cancelled")]
    Cancelled,

    /// Error raised by a preprocess step.
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// Error raised by a training, evaluation or inference step.
    #[error(transparent)]
    Learning(#[from] LearningError),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<WorkflowError>,
    },
}

impl WorkflowError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        WorkflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get a stable error code for machine consumers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::InvalidDefinition(_) => "INVALID_DEFINITION",
            Self::UnresolvedProperty { .. } => "UNRESOLVED_PROPERTY",
            Self::PropertyNotFound { .. } => "PROPERTY_NOT_FOUND",
            Self::Registry(_) => "REGISTRY_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Processing(err) => err.error_code(),
            Self::Learning(err) => err.error_code(),
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error represents a cancellation, at any depth.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Processing(err) => err.is_cancelled(),
            Self::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl Serialize for WorkflowError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("WorkflowError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| WorkflowError::Io(e).with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_codes() {
        let err: WorkflowError = ProcessingError::Cancelled.into();
        assert_eq!(err.error_code(), "CANCELLED");
        assert!(err.is_cancelled());

        let err: WorkflowError = LearningError::InvalidData("x".to_string()).into();
        assert_eq!(err.with_context("TrainModel").error_code(), "INVALID_DATA");
    }

    #[test]
    fn test_error_serialization() {
        let err = WorkflowError::PropertyNotFound {
            file: "EvaluationReport".to_string(),
            path: "regression_metrics.mse.value".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "PROPERTY_NOT_FOUND");
    }
}
