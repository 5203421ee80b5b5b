//! Training step: fit the regressor on `train.csv` and package it.

use crate::config::TrainingConfig;
use crate::dataset::{LabeledTable, read_labeled_table};
use crate::error::{LearningError, Result, ResultExt};
use crate::metrics::regression_metrics;
use crate::ridge::{MODEL_FILE, MultiOutputRidge};
use forecast_processing::artifacts::{MODEL_ARCHIVE, pack_entries};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// File name of the training table inside the train channel.
pub const TRAIN_TABLE: &str = "train.csv";

/// File name of the summary written to the output data directory.
pub const TRAINING_SUMMARY_FILE: &str = "training_summary.json";

/// What a training run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub rows: usize,
    pub features: usize,
    pub outputs: usize,
    pub alpha: f64,
    /// In-sample MSE, for comparing against the held-out one.
    pub train_mse: f64,
    pub duration_ms: u64,
}

/// Paths written by [`Trainer::run`].
#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutputs {
    pub model_file: PathBuf,
    pub model_archive: PathBuf,
    pub summary: TrainingSummary,
}

/// Fits a [`MultiOutputRidge`] according to a [`TrainingConfig`].
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Fit on an in-memory table.
    pub fn fit(&self, table: &LabeledTable) -> Result<MultiOutputRidge> {
        if table.labels.ncols() != self.config.label_count {
            return Err(LearningError::InvalidData(format!(
                "table has {} label columns, configuration expects {}",
                table.labels.ncols(),
                self.config.label_count
            )));
        }
        MultiOutputRidge::fit(table.features.view(), table.labels.view(), &self.config)
    }

    /// Read the train channel, fit, and write `model.json` plus `model.zip`
    /// into `model_dir`. A summary goes to `output_data_dir` when given.
    ///
    /// `train` may be the channel directory or the table itself.
    pub fn run(
        &self,
        train: &Path,
        model_dir: &Path,
        output_data_dir: Option<&Path>,
    ) -> Result<TrainingOutputs> {
        let start = Instant::now();
        let table_path = if train.is_dir() {
            train.join(TRAIN_TABLE)
        } else {
            train.to_path_buf()
        };

        info!("Loading training data from {}", table_path.display());
        let table = read_labeled_table(&table_path, self.config.label_count)?;
        info!(
            "Training data loaded: {} rows, {} features. Starting model training",
            table.n_rows(),
            table.n_features()
        );

        let model = self.fit(&table).context("Fitting ridge regressor")?;
        let fitted = model.predict(table.features.view())?;
        let train_mse = regression_metrics(table.labels.view(), fitted.view())?.mse.value;

        std::fs::create_dir_all(model_dir).context(format!("Creating {}", model_dir.display()))?;
        let model_file = model_dir.join(MODEL_FILE);
        let json = model.to_json()?;
        std::fs::write(&model_file, &json)?;
        let model_archive = model_dir.join(MODEL_ARCHIVE);
        pack_entries(&model_archive, &[(MODEL_FILE, json.as_bytes())])?;
        info!("Model saved at {}", model_archive.display());

        let summary = TrainingSummary {
            rows: table.n_rows(),
            features: table.n_features(),
            outputs: model.n_outputs(),
            alpha: self.config.alpha,
            train_mse,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if let Some(dir) = output_data_dir {
            std::fs::create_dir_all(dir).context(format!("Creating {}", dir.display()))?;
            std::fs::write(
                dir.join(TRAINING_SUMMARY_FILE),
                serde_json::to_string_pretty(&summary)?,
            )?;
        }

        Ok(TrainingOutputs {
            model_file,
            model_archive,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecast_processing::artifacts::read_entry;

    #[test]
    fn test_run_writes_model_and_archive() {
        let dir = tempfile::tempdir().unwrap();
        let channel = dir.path().join("train");
        std::fs::create_dir_all(&channel).unwrap();
        std::fs::write(channel.join(TRAIN_TABLE), "1,2,3\n2,4,5\n3,6,7\n4,8,9\n").unwrap();

        let config = TrainingConfig::builder().alpha(1.0).label_count(2).build().unwrap();
        let outputs = Trainer::new(config)
            .run(&channel, &dir.path().join("model"), Some(&dir.path().join("output")))
            .unwrap();

        assert_eq!(outputs.summary.rows, 4);
        assert_eq!(outputs.summary.features, 1);
        assert_eq!(outputs.summary.outputs, 2);
        assert!(outputs.model_file.exists());

        let packed = read_entry(&outputs.model_archive, MODEL_FILE).unwrap();
        let model = MultiOutputRidge::from_json(&String::from_utf8(packed).unwrap()).unwrap();
        assert_eq!(model.n_outputs(), 2);
        assert!(dir.path().join("output").join(TRAINING_SUMMARY_FILE).exists());
    }

    #[test]
    fn test_label_count_mismatch() {
        let table = LabeledTable {
            features: ndarray::array![[1.0], [2.0]],
            labels: ndarray::array![[1.0], [2.0]],
        };
        let err = Trainer::default().fit(&table).unwrap_err();
        assert!(err.to_string().contains("expects 14"));
    }
}
