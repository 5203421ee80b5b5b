//! Inference handlers and batch prediction.
//!
//! A serving request goes through four handlers:
//!
//! 1. [`model_fn`] loads the regressor (and the fitted transformer, when one
//!    was packaged alongside it) from a model directory
//! 2. [`input_fn`] parses the request body into raw records
//! 3. [`predict_fn`] transforms the records and predicts every horizon
//! 4. [`output_fn`] renders the predictions in the accepted content type
//!
//! [`BatchPrediction`] runs the regressor over the already-transformed
//! `data_to_predict.csv` written by the preprocess step.

use crate::dataset::read_keyed_table;
use crate::error::{LearningError, Result, ResultExt};
use crate::ridge::{MODEL_FILE, MultiOutputRidge};
use forecast_processing::FittedColumnTransformer;
use forecast_processing::artifacts::{MODEL_ARCHIVE, list_entries, read_entry, safe_extract};
use forecast_processing::pipeline::TRANSFORMER_FILE;
use forecast_processing::pipeline::output::write_feature_table;
use ndarray::Array2;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONTENT_TYPE_CSV: &str = "text/csv";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// File name of the batch predictions.
pub const PREDICTIONS_FILE: &str = "predictions.csv";

/// Raw request rows; each field is kept as text until the transformer
/// (or the numeric parser) sees it.
pub type Records = Vec<Vec<String>>;

/// An optional fitted transformer followed by the regressor.
#[derive(Debug, Clone)]
pub struct InferencePipeline {
    transformer: Option<FittedColumnTransformer>,
    model: MultiOutputRidge,
}

impl InferencePipeline {
    pub fn new(model: MultiOutputRidge) -> Self {
        Self {
            transformer: None,
            model,
        }
    }

    pub fn with_transformer(mut self, transformer: FittedColumnTransformer) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn transformer(&self) -> Option<&FittedColumnTransformer> {
        self.transformer.as_ref()
    }

    pub fn model(&self) -> &MultiOutputRidge {
        &self.model
    }

    /// Number of fields each request record must carry.
    pub fn input_width(&self) -> usize {
        match &self.transformer {
            Some(transformer) => transformer.input_columns().len(),
            None => self.model.n_features(),
        }
    }

    /// Predict every output for raw records.
    pub fn predict_records(&self, records: &[Vec<String>]) -> Result<Array2<f64>> {
        let rows = match &self.transformer {
            Some(transformer) => transformer.transform_records(records)?,
            None => parse_numeric_records(records)?,
        };
        self.model.predict_rows(&rows)
    }

    /// Run all handlers on one request, returning the body and its content type.
    pub fn invoke(&self, body: &str, content_type: &str, accept: &str) -> Result<(String, &'static str)> {
        let records = input_fn(body, content_type)?;
        let prediction = predict_fn(&records, self)?;
        output_fn(&prediction, accept)
    }
}

/// Load the inference pipeline from `model_dir`.
///
/// The regressor is read from `model.json`, or from `model.zip` when only
/// the archive is present. A transformer is attached when `transformer.json`
/// sits in the directory or in the archive.
pub fn model_fn(model_dir: &Path) -> Result<InferencePipeline> {
    let archive = model_dir.join(MODEL_ARCHIVE);
    let archive_entries = if archive.exists() {
        list_entries(&archive)?
    } else {
        Vec::new()
    };

    let model_file = model_dir.join(MODEL_FILE);
    let model = if model_file.exists() {
        MultiOutputRidge::load(&model_file)?
    } else if archive_entries.iter().any(|e| e == MODEL_FILE) {
        MultiOutputRidge::from_json(&entry_text(&archive, MODEL_FILE)?)?
    } else {
        return Err(LearningError::ModelNotFound {
            path: model_file.display().to_string(),
        });
    };

    let mut pipeline = InferencePipeline::new(model);
    let transformer_file = model_dir.join(TRANSFORMER_FILE);
    if transformer_file.exists() {
        pipeline = pipeline.with_transformer(FittedColumnTransformer::load(&transformer_file)?);
    } else if archive_entries.iter().any(|e| e == TRANSFORMER_FILE) {
        let transformer = FittedColumnTransformer::from_json(&entry_text(&archive, TRANSFORMER_FILE)?)?;
        pipeline = pipeline.with_transformer(transformer);
    }

    info!(
        "Loaded model from {} ({} outputs, transformer: {})",
        model_dir.display(),
        pipeline.model.n_outputs(),
        pipeline.transformer.is_some()
    );
    Ok(pipeline)
}

/// Parse a request body into records.
///
/// `text/csv`: one record per non-empty line. `application/json`: either an
/// array of rows, a single flat row, or `{"instances": [...]}`.
pub fn input_fn(body: &str, content_type: &str) -> Result<Records> {
    match media_type(content_type).as_str() {
        CONTENT_TYPE_CSV => Ok(body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.split(',').map(|f| f.trim().to_string()).collect())
            .collect()),
        CONTENT_TYPE_JSON => {
            let value: Value = serde_json::from_str(body)?;
            let rows = match value {
                Value::Object(mut map) => map.remove("instances").ok_or_else(|| {
                    LearningError::InferenceError("JSON object must carry 'instances'".to_string())
                })?,
                other => other,
            };
            json_records(rows)
        }
        other => Err(LearningError::UnsupportedContentType(other.to_string())),
    }
}

/// Predict for parsed records.
pub fn predict_fn(records: &[Vec<String>], pipeline: &InferencePipeline) -> Result<Array2<f64>> {
    debug!("Predicting {} record(s)", records.len());
    pipeline.predict_records(records)
}

/// Render predictions as `text/csv` (one row per line) or
/// `application/json` (`{"predictions": [[...]]}`).
pub fn output_fn(prediction: &Array2<f64>, accept: &str) -> Result<(String, &'static str)> {
    let accept = media_type(accept);
    match accept.as_str() {
        "" | "*/*" | CONTENT_TYPE_CSV => {
            let body = prediction
                .rows()
                .into_iter()
                .map(|row| row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
                .collect::<Vec<_>>()
                .join("\n");
            Ok((body, CONTENT_TYPE_CSV))
        }
        CONTENT_TYPE_JSON => {
            #[derive(Serialize)]
            struct Response {
                predictions: Vec<Vec<f64>>,
            }
            let response = Response {
                predictions: prediction.rows().into_iter().map(|row| row.to_vec()).collect(),
            };
            Ok((serde_json::to_string(&response)?, CONTENT_TYPE_JSON))
        }
        other => Err(LearningError::UnsupportedContentType(other.to_string())),
    }
}

fn media_type(header: &str) -> String {
    header
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn entry_text(archive: &Path, name: &str) -> Result<String> {
    let bytes = read_entry(archive, name)?;
    String::from_utf8(bytes)
        .map_err(|_| LearningError::InvalidData(format!("{name} in {} is not UTF-8", archive.display())))
}

fn json_records(value: Value) -> Result<Records> {
    let Value::Array(items) = value else {
        return Err(LearningError::InferenceError(
            "JSON body must be an array of rows".to_string(),
        ));
    };

    if items.iter().all(|item| !item.is_array()) {
        return Ok(vec![json_row(&items)?]);
    }
    items
        .iter()
        .map(|item| match item {
            Value::Array(fields) => json_row(fields),
            _ => Err(LearningError::InferenceError(
                "mixed rows and scalars in JSON body".to_string(),
            )),
        })
        .collect()
}

fn json_row(fields: &[Value]) -> Result<Vec<String>> {
    fields
        .iter()
        .map(|field| match field {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(LearningError::InferenceError(format!(
                "unsupported JSON field {other}"
            ))),
        })
        .collect()
}

fn parse_numeric_records(records: &[Vec<String>]) -> Result<Vec<Vec<f64>>> {
    records
        .iter()
        .enumerate()
        .map(|(i, fields)| {
            fields
                .iter()
                .map(|field| {
                    field.parse::<f64>().map_err(|_| {
                        LearningError::InferenceError(format!(
                            "record {}: '{}' is not a number",
                            i + 1,
                            field
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

/// Result of a batch prediction run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub predictions_path: PathBuf,
    pub rows: usize,
    pub ids: Vec<String>,
}

/// Batch prediction over the transformed rows to predict.
#[derive(Debug, Clone)]
pub struct BatchPrediction {
    pub model_archive: PathBuf,
    /// Headerless table: entity id, then transformed features.
    pub data_to_predict: PathBuf,
    pub extract_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl BatchPrediction {
    /// Standard layout: `model/model.zip`, `transform/data_to_predict.csv`,
    /// `predictions/`.
    pub fn from_base_dir(base_dir: impl AsRef<Path>) -> Self {
        let base = base_dir.as_ref();
        Self {
            model_archive: base.join("model").join(MODEL_ARCHIVE),
            data_to_predict: base.join("transform").join("data_to_predict.csv"),
            extract_dir: base.join("model"),
            output_dir: base.join("predictions"),
        }
    }

    pub fn run(&self) -> Result<BatchOutcome> {
        safe_extract(&self.model_archive, &self.extract_dir)
            .context(format!("Unpacking {}", self.model_archive.display()))?;
        debug!("Loading ridge model");
        let model = MultiOutputRidge::load(self.extract_dir.join(MODEL_FILE))?;

        let table = read_keyed_table(&self.data_to_predict)?;
        info!("Performing predictions against {} row(s)", table.ids.len());
        let predictions = model.predict(table.features.view())?;

        let rows: Vec<Vec<f64>> = predictions.rows().into_iter().map(|row| row.to_vec()).collect();
        let predictions_path = self.output_dir.join(PREDICTIONS_FILE);
        write_feature_table(&predictions_path, &rows, &[])?;
        info!("Writing out predictions to {}", predictions_path.display());

        Ok(BatchOutcome {
            predictions_path,
            rows: rows.len(),
            ids: table.ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn doubling_model() -> MultiOutputRidge {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![[2.0, 3.0], [4.0, 4.0], [6.0, 5.0]];
        let config = TrainingConfig::builder().alpha(0.0).label_count(2).build().unwrap();
        MultiOutputRidge::fit(x.view(), y.view(), &config).unwrap()
    }

    #[test]
    fn test_input_fn_csv() {
        let records = input_fn("1, 2\n\n3,4\n", "text/csv; charset=utf-8").unwrap();
        assert_eq!(records, vec![vec!["1", "2"], vec!["3", "4"]]);
    }

    #[test]
    fn test_input_fn_json_shapes() {
        let rows = input_fn("[[1, 2.5], [3, null]]", CONTENT_TYPE_JSON).unwrap();
        assert_eq!(rows, vec![vec!["1", "2.5"], vec!["3", ""]]);

        let flat = input_fn(r#"[1, "M"]"#, CONTENT_TYPE_JSON).unwrap();
        assert_eq!(flat, vec![vec!["1", "M"]]);

        let wrapped = input_fn(r#"{"instances": [[7]]}"#, CONTENT_TYPE_JSON).unwrap();
        assert_eq!(wrapped, vec![vec!["7"]]);
    }

    #[test]
    fn test_unsupported_content_types() {
        let err = input_fn("x", "application/x-npy").unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_CONTENT_TYPE");

        let err = output_fn(&array![[1.0]], "application/xml").unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_CONTENT_TYPE");
    }

    #[test]
    fn test_invoke_round_trip() {
        let pipeline = InferencePipeline::new(doubling_model());

        let (body, content_type) = pipeline.invoke("4\n", CONTENT_TYPE_CSV, "*/*").unwrap();
        assert_eq!(content_type, CONTENT_TYPE_CSV);
        let values: Vec<f64> = body.split(',').map(|v| v.parse().unwrap()).collect();
        assert!((values[0] - 8.0).abs() < 1e-6);
        assert!((values[1] - 6.0).abs() < 1e-6);

        let (body, content_type) = pipeline.invoke("[[4]]", CONTENT_TYPE_JSON, CONTENT_TYPE_JSON).unwrap();
        assert_eq!(content_type, CONTENT_TYPE_JSON);
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["predictions"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_non_numeric_field_without_transformer() {
        let pipeline = InferencePipeline::new(doubling_model());
        let err = pipeline.invoke("M\n", CONTENT_TYPE_CSV, CONTENT_TYPE_CSV).unwrap_err();
        assert_eq!(err.error_code(), "INFERENCE_ERROR");
    }

    #[test]
    fn test_model_fn_reads_archive_only_dir() {
        let dir = tempfile::tempdir().unwrap();
        let json = doubling_model().to_json().unwrap();
        forecast_processing::artifacts::pack_entries(
            dir.path().join(MODEL_ARCHIVE),
            &[(MODEL_FILE, json.as_bytes())],
        )
        .unwrap();

        let pipeline = model_fn(dir.path()).unwrap();
        assert_eq!(pipeline.model().n_outputs(), 2);
        assert!(pipeline.transformer().is_none());
        assert_eq!(pipeline.input_width(), 1);
    }

    #[test]
    fn test_model_fn_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(model_fn(dir.path()).unwrap_err().error_code(), "MODEL_NOT_FOUND");
    }
}
