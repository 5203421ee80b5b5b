//! forecast-learning: ridge training, evaluation and inference.
//!
//! The tables written by `forecast-processing` carry features followed by
//! `label_count` label columns (one per forecast day). This crate fits one
//! ridge model per label over the shared features, scores it on the test
//! table, and serves predictions.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use forecast_learning::{Evaluation, Trainer, TrainingConfig};
//!
//! let config = TrainingConfig::builder().alpha(10.0).label_count(14).build()?;
//! let outputs = Trainer::new(config).run(
//!     "/opt/ml/input/data/train".as_ref(),
//!     "/opt/ml/model".as_ref(),
//!     None,
//! )?;
//!
//! let outcome = Evaluation::from_base_dir("/opt/ml/processing", 14).run()?;
//! println!("mse = {}", outcome.report.regression_metrics.mse.value);
//! ```
//!
//! # Serving
//!
//! ```rust,ignore
//! use forecast_learning::inference::{model_fn, CONTENT_TYPE_CSV};
//!
//! let pipeline = model_fn("/opt/ml/model".as_ref())?;
//! let (body, content_type) = pipeline.invoke("101,1,55,120,...", CONTENT_TYPE_CSV, "text/csv")?;
//! ```

pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod inference;
pub mod metrics;
pub mod ridge;
pub mod train;

pub use config::{ConfigValidationError, TrainingConfig, TrainingConfigBuilder};
pub use dataset::{KeyedTable, LabeledTable, read_keyed_table, read_labeled_table, read_matrix};
pub use error::{LearningError, Result, ResultExt};
pub use evaluate::{EVALUATION_FILE, Evaluation, EvaluationOutcome, EvaluationReport};
pub use inference::{BatchOutcome, BatchPrediction, InferencePipeline, input_fn, model_fn, output_fn, predict_fn};
pub use metrics::{MetricValue, RegressionMetrics, regression_metrics};
pub use ridge::{MODEL_FILE, MultiOutputRidge};
pub use train::{Trainer, TrainingOutputs, TrainingSummary};
