//! Pipeline module.
//!
//! This module provides the preprocess step and its progress plumbing.

mod builder;
pub mod output;
pub mod progress;

pub use builder::{
    PREDICT_FILE, Preprocessor, PreprocessorBuilder, TEST_FILE, TRAIN_FILE, TRANSFORMER_DIR,
    TRANSFORMER_FILE, VALIDATION_FILE,
};
pub use progress::{
    CancellationToken, ClosureProgressReporter, PreprocessingStage, ProgressReporter,
    ProgressUpdate,
};
