//! The preprocess step.
//!
//! [`Preprocessor`] turns the stacked raw extracts into the tables consumed
//! by training, evaluation and batch prediction, plus the packaged column
//! transformer used at inference time.

use crate::artifacts::{MODEL_ARCHIVE, pack_entries};
use crate::builder::{DataBuilder, DataManifest, ObjectStore};
use crate::config::{ConfigValidationError, FeatureConfig};
use crate::error::{ProcessingError, Result, ResultExt};
use crate::features::{
    ColumnTransformer, FittedColumnTransformer, GroupIndex, add_calendar_columns,
    add_lagged_features, add_multistep_target, cyclic_column_names, cyclic_encode_month,
    cyclic_encode_weekday, partition_by_date,
};
use crate::imputers::ForwardFillImputer;
use crate::pipeline::output::{write_feature_table, write_keyed_table};
use crate::pipeline::progress::{
    CancellationToken, ClosureProgressReporter, PreprocessingStage, ProgressReporter,
    ProgressUpdate,
};
use crate::splitter::DataSplitter;
use crate::types::{PreprocessOutputs, ProcessingSummary};
use crate::utils::{entity_keys, numeric_values};
use polars::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Entry name of the fitted transformer inside `model.zip`.
pub const TRANSFORMER_FILE: &str = "transformer.json";

/// Output locations relative to the base directory.
pub const TRAIN_FILE: &str = "train/train.csv";
pub const TEST_FILE: &str = "test/test.csv";
pub const VALIDATION_FILE: &str = "validation/validation.csv";
pub const PREDICT_FILE: &str = "transform/data_to_predict.csv";
pub const TRANSFORMER_DIR: &str = "model";

/// Feature engineering step from raw extracts to training tables.
///
/// # Example
///
/// ```rust,ignore
/// use forecast_processing::{Preprocessor, FeatureConfig};
///
/// let outputs = Preprocessor::builder()
///     .config(FeatureConfig::builder().base_dir("/tmp/run").build()?)
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?
///     .process(raw)?;
/// println!("train table at {}", outputs.train.display());
/// ```
pub struct Preprocessor {
    config: FeatureConfig,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: CancellationToken,
}

static_assertions::assert_impl_all!(Preprocessor: Send);

impl Preprocessor {
    pub fn builder() -> PreprocessorBuilder {
        PreprocessorBuilder::default()
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Load the manifest's extracts through `store` and process them.
    pub fn run(&self, manifest: DataManifest, store: Arc<dyn ObjectStore>) -> Result<PreprocessOutputs> {
        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::Loading,
            0.0,
            format!("Loading {} extract(s)", manifest.len()),
        ));

        let builder = DataBuilder::new(&self.config.base_dir, manifest, store, self.config.clone());
        let raw = match builder.build() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                let e = ProcessingError::EmptyData("data manifest lists no sources".to_string());
                self.report_progress(ProgressUpdate::failed(e.to_string()));
                return Err(e);
            }
            Err(e) => {
                self.report_progress(ProgressUpdate::failed(e.to_string()));
                return Err(e);
            }
        };

        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::Loading,
            1.0,
            format!("Loaded {} raw rows", raw.height()),
        ));
        self.process(raw)
    }

    /// Process a stacked raw table and write every output table.
    ///
    /// # Errors
    ///
    /// Returns `Err(ProcessingError::Cancelled)` if the token was cancelled
    /// between stages.
    pub fn process(&self, raw: DataFrame) -> Result<PreprocessOutputs> {
        match self.process_internal(raw) {
            Ok(outputs) => {
                self.report_progress(ProgressUpdate::complete("Preprocessing completed"));
                Ok(outputs)
            }
            Err(e) => {
                if e.is_cancelled() {
                    self.report_progress(ProgressUpdate::cancelled());
                } else {
                    self.report_progress(ProgressUpdate::failed(e.to_string()));
                }
                error!("Preprocessing error: {}", e);
                Err(e)
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }
        Ok(())
    }

    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn process_internal(&self, raw: DataFrame) -> Result<PreprocessOutputs> {
        let start_time = Instant::now();
        let config = &self.config;
        let mut summary = ProcessingSummary::new();
        summary.raw_rows = raw.height();

        info!("Starting preprocessing of {} raw rows", raw.height());
        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::Initializing,
            0.0,
            "Starting preprocessing",
        ));
        if raw.height() == 0 {
            return Err(ProcessingError::EmptyData("raw extracts contain no rows".to_string()));
        }

        self.check_cancelled()?;

        // Step 1: daily re-index and forward fill per entity
        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::Imputation,
            0.0,
            "Forward filling per entity",
        ));
        let mut df = ForwardFillImputer::new(config)
            .impute(&raw)
            .context("Forward filling raw data")?;
        summary.imputed_rows = df.height();
        summary.entities = GroupIndex::build(&df, config)?.len();
        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::Imputation,
            1.0,
            format!("{} rows across {} entities", df.height(), summary.entities),
        ));

        self.check_cancelled()?;

        // Step 2: calendar encodings, lags, multistep targets
        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::FeatureEngineering,
            0.0,
            "Adding calendar features",
        ));
        add_calendar_columns(&mut df, config)?;
        cyclic_encode_weekday(&mut df)?;
        cyclic_encode_month(&mut df)?;

        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::FeatureEngineering,
            0.4,
            "Adding lag features",
        ));
        let lag_columns = add_lagged_features(&mut df, config, &config.target_column, &config.lags)?;

        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::FeatureEngineering,
            0.7,
            "Adding multistep targets",
        ));
        let label_columns =
            add_multistep_target(&mut df, config, &config.target_column, config.horizon)?;
        debug!("Engineered frame has {} columns", df.width());

        self.check_cancelled()?;

        // Step 3: train/predict partition
        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::Partitioning,
            0.0,
            "Partitioning by date",
        ));
        let partition = partition_by_date(&df, config, config.predict_date)?;
        summary.predict_date = Some(partition.predict_date);
        summary.predict_rows = partition.predict.height();
        if partition.train.height() == 0 {
            return Err(ProcessingError::EmptyData(format!(
                "no complete training rows before {}",
                partition.predict_date
            )));
        }
        if partition.predict.height() == 0 {
            summary.add_warning(format!("No rows to predict on {}", partition.predict_date));
        }

        self.check_cancelled()?;

        // Step 4: per-site split
        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::Splitting,
            0.0,
            "Splitting sites",
        ));
        let split = DataSplitter::new(config).split(&partition.train)?;
        summary.train_rows = split.train.height();
        summary.test_rows = split.test.height();
        summary.validation_rows = split.validation.as_ref().map_or(0, |v| v.height());
        if split.test.height() == 0 {
            summary.add_warning("Test split is empty");
        }

        self.check_cancelled()?;

        // Step 5: fit transforms on the training rows only
        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::Transforming,
            0.0,
            "Fitting column transforms",
        ));
        let mut numeric_inputs = config.feature_columns.clone();
        numeric_inputs.extend(lag_columns);
        numeric_inputs.extend(cyclic_column_names());
        let transformer = ColumnTransformer::new()
            .numeric(numeric_inputs)
            .categorical(config.group_columns.iter().cloned())
            .fit(&split.train)?;
        summary.feature_count = transformer.n_outputs();
        summary.label_count = label_columns.len();
        debug!("Transformed features: {:?}", transformer.output_columns());

        self.check_cancelled()?;

        // Step 6: write tables and the packaged transformer
        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::Writing,
            0.0,
            "Writing outputs",
        ));
        let base = &config.base_dir;

        let train_path = base.join(TRAIN_FILE);
        write_labelled(&train_path, &transformer, &split.train, &label_columns)?;

        let test_path = base.join(TEST_FILE);
        write_labelled(&test_path, &transformer, &split.test, &label_columns)?;

        let validation_path = match &split.validation {
            Some(validation) => {
                let path = base.join(VALIDATION_FILE);
                write_labelled(&path, &transformer, validation, &label_columns)?;
                Some(path)
            }
            None => None,
        };

        let predict_path = base.join(PREDICT_FILE);
        let keys = entity_keys(&partition.predict, &config.group_columns)?;
        write_keyed_table(&predict_path, &keys, &transformer.transform(&partition.predict)?)?;

        let archive_path = base.join(TRANSFORMER_DIR).join(MODEL_ARCHIVE);
        let transformer_json = transformer.to_json()?;
        pack_entries(&archive_path, &[(TRANSFORMER_FILE, transformer_json.as_bytes())])?;

        self.report_progress(ProgressUpdate::new(
            PreprocessingStage::Writing,
            1.0,
            "Outputs written",
        ));

        summary.duration_ms = start_time.elapsed().as_millis() as u64;
        if summary.usable_percentage() < 50.0 {
            summary.add_warning(format!(
                "Only {:.1}% of engineered rows are usable",
                summary.usable_percentage()
            ));
        }
        for warning in &summary.warnings {
            warn!("{}", warning);
        }
        info!(
            "Preprocessing finished in {} ms: train={}, test={}, predict={}",
            summary.duration_ms, summary.train_rows, summary.test_rows, summary.predict_rows
        );

        Ok(PreprocessOutputs {
            train: train_path,
            test: test_path,
            validation: validation_path,
            data_to_predict: predict_path,
            transformer_archive: archive_path,
            summary,
        })
    }
}

fn write_labelled(
    path: &std::path::Path,
    transformer: &FittedColumnTransformer,
    df: &DataFrame,
    label_columns: &[String],
) -> Result<()> {
    let features = transformer.transform(df)?;
    let label_values = label_columns
        .iter()
        .map(|name| numeric_values(df, name))
        .collect::<Result<Vec<_>>>()?;

    let labels = (0..df.height())
        .map(|row| {
            label_values
                .iter()
                .map(|column| {
                    column[row].ok_or_else(|| {
                        ProcessingError::EmptyData(format!("missing label in row {row}"))
                    })
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    write_feature_table(path, &features, &labels)
}

/// Builder for [`Preprocessor`].
#[derive(Default)]
pub struct PreprocessorBuilder {
    config: Option<FeatureConfig>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: Option<CancellationToken>,
    base_dir: Option<PathBuf>,
}

static_assertions::assert_impl_all!(PreprocessorBuilder: Send);

impl PreprocessorBuilder {
    pub fn config(mut self, config: FeatureConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the configured base directory.
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(path.into());
        self
    }

    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Build the preprocessor, validating the configuration.
    pub fn build(self) -> std::result::Result<Preprocessor, ConfigValidationError> {
        let mut config = self.config.unwrap_or_default();
        if let Some(base_dir) = self.base_dir {
            config.base_dir = base_dir;
        }
        config.validate()?;

        Ok(Preprocessor {
            config,
            progress_reporter: self.progress_reporter,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn raw_frame() -> DataFrame {
        let mut dates = Vec::new();
        let mut sites = Vec::new();
        let mut kinds = Vec::new();
        let mut occupancy = Vec::new();
        let mut capacity = Vec::new();
        for (site, base) in [("1", 10.0), ("2", 40.0)] {
            for day in 1..=20u32 {
                // day 5 is missing for every site
                if day == 5 {
                    continue;
                }
                dates.push(format!("2024-03-{day:02}"));
                sites.push(site);
                kinds.push("1");
                occupancy.push(base + (day % 7) as f64);
                capacity.push(100.0);
            }
        }
        df![
            "Date" => dates,
            "location_id" => sites,
            "location_parking_type_id" => kinds,
            "occupancy" => occupancy,
            "capacity" => capacity,
        ]
        .unwrap()
    }

    fn config(base_dir: &std::path::Path) -> FeatureConfig {
        FeatureConfig::builder()
            .lags(vec![1, 2])
            .horizon(3)
            .base_dir(base_dir)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_validates_config() {
        let mut bad = FeatureConfig::default();
        bad.horizon = 0;
        assert!(Preprocessor::builder().config(bad).build().is_err());
    }

    #[test]
    fn test_builder_base_dir_override() {
        let preprocessor = Preprocessor::builder().base_dir("/tmp/elsewhere").build().unwrap();
        assert_eq!(preprocessor.config().base_dir, PathBuf::from("/tmp/elsewhere"));
    }

    #[test]
    fn test_check_cancelled() {
        let token = CancellationToken::new();
        let preprocessor = Preprocessor::builder()
            .cancellation_token(token.clone())
            .build()
            .unwrap();

        assert!(preprocessor.check_cancelled().is_ok());
        token.cancel();
        assert!(matches!(
            preprocessor.check_cancelled().unwrap_err(),
            ProcessingError::Cancelled
        ));
    }

    #[test]
    fn test_cancelled_run_reports_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let last_stage = Arc::new(parking_lot::Mutex::new(None));
        let last_stage_clone = last_stage.clone();

        let result = Preprocessor::builder()
            .config(config(dir.path()))
            .cancellation_token(token)
            .on_progress(move |update| *last_stage_clone.lock() = Some(update.stage))
            .build()
            .unwrap()
            .process(raw_frame());

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(*last_stage.lock(), Some(PreprocessingStage::Cancelled));
    }

    #[test]
    fn test_process_writes_all_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let outputs = Preprocessor::builder()
            .config(config(dir.path()))
            .on_progress(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap()
            .process(raw_frame())
            .unwrap();

        let summary = &outputs.summary;
        assert_eq!(summary.raw_rows, 38);
        assert_eq!(summary.imputed_rows, 40);
        assert_eq!(summary.entities, 2);
        assert_eq!(summary.predict_rows, 2);
        // per site: days 3..=17 have both lags and 3 days ahead
        assert_eq!(summary.train_rows + summary.test_rows, 2 * 15);
        assert_eq!(summary.test_rows, 2 * 3);
        assert_eq!(summary.label_count, 3);
        // occupancy, capacity, 2 lags, 4 cyclic, 2 + 1 one-hot
        assert_eq!(summary.feature_count, 11);

        let train = std::fs::read_to_string(&outputs.train).unwrap();
        let first = train.lines().next().unwrap();
        assert_eq!(first.split(',').count(), 11 + 3);

        let predict = std::fs::read_to_string(&outputs.data_to_predict).unwrap();
        let keys: Vec<&str> = predict
            .lines()
            .map(|line| line.split(',').next().unwrap())
            .collect();
        assert_eq!(keys, vec!["1:1", "2:1"]);

        assert!(outputs.transformer_archive.exists());
        assert!(outputs.validation.is_none());
        assert!(calls.load(Ordering::SeqCst) > 5);
    }
}
