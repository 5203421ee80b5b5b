//! Evaluation step: score a packaged model on the held-out test table.
//!
//! The model archive is unpacked with traversal checks, the regressor is
//! loaded, and the report written to `evaluation/evaluation.json` in the
//! shape the registration condition reads (`regression_metrics.mse.value`).

use crate::dataset::read_labeled_table;
use crate::error::{Result, ResultExt};
use crate::metrics::{RegressionMetrics, regression_metrics};
use crate::ridge::{MODEL_FILE, MultiOutputRidge};
use forecast_processing::artifacts::{MODEL_ARCHIVE, safe_extract};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// File name of the evaluation report.
pub const EVALUATION_FILE: &str = "evaluation.json";

/// The evaluation report written by [`Evaluation::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub regression_metrics: RegressionMetrics,
}

/// Result of an evaluation run.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutcome {
    pub report: EvaluationReport,
    pub report_path: PathBuf,
    pub test_rows: usize,
    pub duration_ms: u64,
}

/// Locations used by an evaluation run.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Zip produced by the training step.
    pub model_archive: PathBuf,
    /// Headerless test table, labels last.
    pub test_table: PathBuf,
    /// Where the archive is unpacked.
    pub extract_dir: PathBuf,
    /// Directory receiving `evaluation.json`.
    pub output_dir: PathBuf,
    pub label_count: usize,
}

impl Evaluation {
    /// Standard layout under a processing base directory:
    /// `model/model.zip`, `test/test.csv`, `evaluation/`.
    pub fn from_base_dir(base_dir: impl AsRef<Path>, label_count: usize) -> Self {
        let base = base_dir.as_ref();
        Self {
            model_archive: base.join("model").join(MODEL_ARCHIVE),
            test_table: base.join("test").join("test.csv"),
            extract_dir: base.join("model"),
            output_dir: base.join("evaluation"),
            label_count,
        }
    }

    pub fn run(&self) -> Result<EvaluationOutcome> {
        let start = Instant::now();

        debug!("Extracting {}", self.model_archive.display());
        safe_extract(&self.model_archive, &self.extract_dir)
            .context(format!("Unpacking {}", self.model_archive.display()))?;

        debug!("Loading ridge model");
        let model = MultiOutputRidge::load(self.extract_dir.join(MODEL_FILE))?;

        debug!("Reading test data");
        let table = read_labeled_table(&self.test_table, self.label_count)?;

        info!("Performing predictions against {} test rows", table.n_rows());
        let predictions = model.predict(table.features.view())?;
        let metrics = regression_metrics(table.labels.view(), predictions.view())?;

        let report = EvaluationReport {
            regression_metrics: metrics,
        };
        std::fs::create_dir_all(&self.output_dir)
            .context(format!("Creating {}", self.output_dir.display()))?;
        let report_path = self.output_dir.join(EVALUATION_FILE);
        std::fs::write(&report_path, serde_json::to_string(&report)?)?;

        info!(
            "Writing out evaluation report with mse: {:.6}",
            report.regression_metrics.mse.value
        );

        Ok(EvaluationOutcome {
            report,
            report_path,
            test_rows: table.n_rows(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
