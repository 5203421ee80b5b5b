//! Progress reporting and cancellation support for the preprocess step.
//!
//! A long run over many extracts can be observed through a
//! [`ProgressReporter`] and stopped from another thread with a
//! [`CancellationToken`].
//!
//! # Example
//!
//! ```rust,ignore
//! use forecast_processing::{Preprocessor, CancellationToken};
//!
//! let token = CancellationToken::new();
//! let token_clone = token.clone();
//!
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(60));
//!     token_clone.cancel();
//! });
//!
//! let outputs = Preprocessor::builder()
//!     .cancellation_token(token)
//!     .on_progress(|update| {
//!         println!("[{:?}] {}", update.stage, update.message);
//!     })
//!     .build()?
//!     .process(raw)?;
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stages of the preprocess step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessingStage {
    /// Validating inputs and preparing output directories
    Initializing,
    /// Downloading and concatenating the raw extracts
    Loading,
    /// Forward filling each entity onto a daily calendar
    Imputation,
    /// Calendar encodings, lags and multistep targets
    FeatureEngineering,
    /// Train / predict partition by date
    Partitioning,
    /// Per-site train / test split
    Splitting,
    /// Fitting and applying the column transforms
    Transforming,
    /// Writing tables and the packaged transformer
    Writing,
    /// Step completed successfully
    Complete,
    /// Step was cancelled
    Cancelled,
    /// Step failed with an error
    Failed,
}

impl PreprocessingStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Loading => "Loading Extracts",
            Self::Imputation => "Forward Filling",
            Self::FeatureEngineering => "Engineering Features",
            Self::Partitioning => "Partitioning by Date",
            Self::Splitting => "Splitting Sites",
            Self::Transforming => "Transforming Columns",
            Self::Writing => "Writing Outputs",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }

    /// Share of the whole run spent in this stage (0.0 - 1.0).
    pub fn weight(&self) -> f32 {
        match self {
            Self::Initializing => 0.02,
            Self::Loading => 0.18,
            Self::Imputation => 0.15,
            Self::FeatureEngineering => 0.20,
            Self::Partitioning => 0.05,
            Self::Splitting => 0.05,
            Self::Transforming => 0.15,
            Self::Writing => 0.20,
            Self::Complete | Self::Cancelled | Self::Failed => 0.0,
        }
    }

    /// Cumulative progress at the start of this stage.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Initializing => 0.0,
            Self::Loading => 0.02,
            Self::Imputation => 0.20,
            Self::FeatureEngineering => 0.35,
            Self::Partitioning => 0.55,
            Self::Splitting => 0.60,
            Self::Transforming => 0.65,
            Self::Writing => 0.80,
            Self::Complete => 1.0,
            Self::Cancelled | Self::Failed => 0.0,
        }
    }
}

/// Progress update emitted by the preprocess step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: PreprocessingStage,

    /// Optional detail such as "Extract 2/5".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<String>,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Progress within current stage (0.0 - 1.0)
    pub stage_progress: f32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_total: Option<usize>,
}

impl ProgressUpdate {
    pub fn new(stage: PreprocessingStage, stage_progress: f32, message: impl Into<String>) -> Self {
        let progress = stage.base_progress() + (stage.weight() * stage_progress);
        Self {
            stage,
            sub_stage: None,
            progress: progress.clamp(0.0, 1.0),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Update counting items within a stage.
    pub fn with_items(
        stage: PreprocessingStage,
        sub_stage: impl Into<String>,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        let stage_progress = if total > 0 {
            current as f32 / total as f32
        } else {
            0.0
        };
        Self {
            sub_stage: Some(sub_stage.into()),
            items_processed: Some(current),
            items_total: Some(total),
            ..Self::new(stage, stage_progress, message)
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            stage: PreprocessingStage::Complete,
            sub_stage: None,
            progress: 1.0,
            stage_progress: 1.0,
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            stage: PreprocessingStage::Cancelled,
            sub_stage: None,
            progress: 0.0,
            stage_progress: 0.0,
            message: "Preprocessing cancelled".to_string(),
            items_processed: None,
            items_total: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stage: PreprocessingStage::Failed,
            sub_stage: None,
            progress: 0.0,
            stage_progress: 0.0,
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }
}

/// Receiver of progress updates.
///
/// Implementations must be `Send + Sync`; the step may run on a worker
/// thread while updates are consumed elsewhere.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// [`ProgressReporter`] backed by a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// Shared flag for stopping a running step.
///
/// Clones share state. The step checks the flag between stages and returns
/// [`ProcessingError::Cancelled`](crate::error::ProcessingError::Cancelled).
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const WORK_STAGES: [PreprocessingStage; 8] = [
        PreprocessingStage::Initializing,
        PreprocessingStage::Loading,
        PreprocessingStage::Imputation,
        PreprocessingStage::FeatureEngineering,
        PreprocessingStage::Partitioning,
        PreprocessingStage::Splitting,
        PreprocessingStage::Transforming,
        PreprocessingStage::Writing,
    ];

    #[test]
    fn test_cancellation_token_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();
        assert!(!token2.is_cancelled());

        token1.cancel();
        assert!(token2.is_cancelled());

        token2.reset();
        assert!(!token1.is_cancelled());
    }

    #[test]
    fn test_progress_update_with_items() {
        let update = ProgressUpdate::with_items(
            PreprocessingStage::Loading,
            "Extract 1/2",
            1,
            2,
            "Downloading extract",
        );
        assert_eq!(update.stage_progress, 0.5);
        assert_eq!(update.items_total, Some(2));
        assert!((update.progress - 0.11).abs() < 1e-6);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total: f32 = WORK_STAGES.iter().map(|s| s.weight()).sum();
        assert!((total - 1.0).abs() < 0.01, "Weights should sum to ~1.0");
    }

    #[test]
    fn test_base_progress_is_cumulative() {
        let mut expected = 0.0;
        for stage in WORK_STAGES {
            assert!((stage.base_progress() - expected).abs() < 1e-6, "{stage:?}");
            expected += stage.weight();
        }
    }

    #[test]
    fn test_closure_progress_reporter() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let reporter = ClosureProgressReporter::new(move |_update| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        });
        reporter.report(ProgressUpdate::new(PreprocessingStage::Loading, 0.5, "Test"));
        reporter.report(ProgressUpdate::complete("Done"));

        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stage_json_values() {
        let json = serde_json::to_string(&PreprocessingStage::FeatureEngineering).unwrap();
        assert_eq!(json, "\"feature_engineering\"");

        let update = ProgressUpdate::new(PreprocessingStage::Writing, 1.0, "done");
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"stage\":\"writing\""));
        assert!(!json.contains("sub_stage"));
    }
}
