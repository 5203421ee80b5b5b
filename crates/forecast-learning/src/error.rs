//! Error types for the forecast-learning crate.
//!
//! [`LearningError`] is returned by every fallible public function. Errors
//! coming from the processing crate (tables, transformer, archives) are
//! wrapped rather than flattened so their codes survive.

use forecast_processing::ProcessingError;
use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for training, evaluation and inference.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LearningError {
    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid data provided for training or inference.
    ///
    /// Common causes:
    /// - the table has fewer columns than the configured label count
    /// - a cell is empty or not numeric
    /// - feature width differs from what the model was fitted on
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Fitting the regressor failed.
    #[error("Training failed: {0}")]
    TrainingFailed(String),

    /// The model file (or the archive carrying it) was not found.
    #[error("Model not found: {path}")]
    ModelNotFound {
        /// The path that was not found.
        path: String,
    },

    /// An error occurred during inference.
    #[error("Inference error: {0}")]
    InferenceError(String),

    /// Request or response content type is not handled.
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// Error raised by the processing crate.
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<LearningError>,
    },
}

impl LearningError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        LearningError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get a stable error code for machine consumers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::InvalidData(_) => "INVALID_DATA",
            Self::TrainingFailed(_) => "TRAINING_FAILED",
            Self::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            Self::InferenceError(_) => "INFERENCE_ERROR",
            Self::UnsupportedContentType(_) => "UNSUPPORTED_CONTENT_TYPE",
            Self::Processing(err) => err.error_code(),
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }
}

impl Serialize for LearningError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("LearningError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for learning operations.
pub type Result<T> = std::result::Result<T, LearningError>;

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

impl<T> ResultExt<T> for std::result::Result<T, ProcessingError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| LearningError::Processing(e).with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| LearningError::Io(e).with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_codes_pass_through() {
        let err: LearningError = ProcessingError::PathTraversal("../model.json".to_string()).into();
        assert_eq!(err.error_code(), "PATH_TRAVERSAL");
        assert!(err.to_string().contains("path traversal"));
    }

    #[test]
    fn test_context_keeps_code() {
        let err = LearningError::InvalidData("3 columns".to_string()).with_context("Reading train.csv");
        assert_eq!(err.error_code(), "INVALID_DATA");
        assert!(err.to_string().starts_with("Reading train.csv"));
    }

    #[test]
    fn test_error_serialization() {
        let err = LearningError::ModelNotFound {
            path: "/opt/ml/model/model.json".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "MODEL_NOT_FOUND");
        assert!(json["message"].as_str().unwrap().contains("model.json"));
    }
}
