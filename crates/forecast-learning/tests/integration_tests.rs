//! Integration tests for the train, evaluate and predict steps.
//!
//! Fixtures under `tests/fixtures` hold three features and two labels
//! generated from `y1 = 1 + 2a - b + 0.5c` and `y2 = 3 - a + c`; the test
//! table adds +/-0.5 to every label.

use forecast_learning::inference::{CONTENT_TYPE_CSV, CONTENT_TYPE_JSON, model_fn};
use forecast_learning::{BatchPrediction, Evaluation, MODEL_FILE, Trainer, TrainingConfig};
use forecast_processing::artifacts::{MODEL_ARCHIVE, pack_entries};
use forecast_processing::pipeline::TRANSFORMER_FILE;
use forecast_processing::ColumnTransformer;
use polars::prelude::*;
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};

// ============================================================================
// Helper Functions
// ============================================================================

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn config() -> TrainingConfig {
    TrainingConfig::builder()
        .alpha(1e-6)
        .label_count(2)
        .build()
        .unwrap()
}

/// Lay out a processing base directory the way the pipeline steps share it.
fn stage_base_dir(base: &Path) {
    for (dir, file) in [
        ("test", "test.csv"),
        ("transform", "data_to_predict.csv"),
    ] {
        std::fs::create_dir_all(base.join(dir)).unwrap();
        std::fs::copy(fixtures_path().join(file), base.join(dir).join(file)).unwrap();
    }
}

// ============================================================================
// Train -> Evaluate -> Predict
// ============================================================================

#[test]
fn test_train_evaluate_predict() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    stage_base_dir(base);

    let outputs = Trainer::new(config())
        .run(&fixtures_path().join("train.csv"), &base.join("model"), None)
        .unwrap();
    assert_eq!(outputs.summary.rows, 24);
    assert_eq!(outputs.summary.features, 3);
    assert!(outputs.summary.train_mse < 1e-6);

    let outcome = Evaluation::from_base_dir(base, 2).run().unwrap();
    let mse = outcome.report.regression_metrics.mse;
    assert!((mse.value - 0.25).abs() < 1e-3, "mse = {}", mse.value);
    assert!((mse.standard_deviation.unwrap() - 0.5).abs() < 1e-3);
    assert_eq!(outcome.report.regression_metrics.mse_per_horizon.len(), 2);

    let batch = BatchPrediction::from_base_dir(base).run().unwrap();
    assert_eq!(batch.ids, vec!["101:1", "202:2", "303:1"]);

    let predictions: Vec<Vec<f64>> = std::fs::read_to_string(&batch.predictions_path)
        .unwrap()
        .lines()
        .map(|line| line.split(',').map(|v| v.parse().unwrap()).collect())
        .collect();
    assert_eq!(predictions.len(), 3);
    // a = 15, b = -2.964095, c = -4
    assert!((predictions[0][0] - 31.964095).abs() < 1e-3);
    assert!((predictions[0][1] + 16.0).abs() < 1e-3);
}

#[test]
fn test_default_label_count_rejects_narrow_table() {
    let dir = tempfile::tempdir().unwrap();
    let err = Trainer::default()
        .run(&fixtures_path().join("train.csv"), dir.path(), None)
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_DATA");
}

#[test]
fn test_evaluate_without_model_archive() {
    let dir = tempfile::tempdir().unwrap();
    stage_base_dir(dir.path());

    let err = Evaluation::from_base_dir(dir.path(), 2).run().unwrap_err();
    assert_eq!(err.error_code(), "IO_ERROR");
}

// ============================================================================
// Serving
// ============================================================================

#[test]
fn test_serving_from_trained_model_dir() {
    let dir = tempfile::tempdir().unwrap();
    Trainer::new(config())
        .run(&fixtures_path(), dir.path(), None)
        .unwrap();

    let pipeline = model_fn(dir.path()).unwrap();
    let (body, content_type) = pipeline
        .invoke("15.0,-2.964095,-4\n", CONTENT_TYPE_CSV, CONTENT_TYPE_JSON)
        .unwrap();

    assert_eq!(content_type, CONTENT_TYPE_JSON);
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let row = parsed["predictions"][0].as_array().unwrap();
    assert!((row[1].as_f64().unwrap() + 16.0).abs() < 1e-3);
}

#[test]
fn test_serving_with_packaged_transformer() {
    let dir = tempfile::tempdir().unwrap();

    // raw frame: a site id plus one numeric reading; target = 3 * reading
    let raw = df![
        "location_id" => ["7", "7", "9", "9"],
        "reading" => [1.0, 2.0, 3.0, 4.0],
    ]
    .unwrap();
    let transformer = ColumnTransformer::new()
        .categorical(["location_id"])
        .numeric(["reading"])
        .fit(&raw)
        .unwrap();
    let features = transformer.transform(&raw).unwrap();
    let labels: Vec<f64> = vec![3.0, 6.0, 9.0, 12.0];

    let x = ndarray::Array2::from_shape_fn((4, features[0].len()), |(i, j)| features[i][j]);
    let y = ndarray::Array2::from_shape_fn((4, 1), |(i, _)| labels[i]);
    let one_label = TrainingConfig::builder().alpha(1e-6).label_count(1).build().unwrap();
    let model = forecast_learning::MultiOutputRidge::fit(x.view(), y.view(), &one_label).unwrap();

    let model_json = model.to_json().unwrap();
    let transformer_json = transformer.to_json().unwrap();
    pack_entries(
        dir.path().join(MODEL_ARCHIVE),
        &[
            (MODEL_FILE, model_json.as_bytes()),
            (TRANSFORMER_FILE, transformer_json.as_bytes()),
        ],
    )
    .unwrap();

    let pipeline = model_fn(dir.path()).unwrap();
    assert!(pipeline.transformer().is_some());
    assert_eq!(pipeline.input_width(), 2);

    // raw fields in transformer input order: location_id, reading
    let (body, _) = pipeline.invoke("9,2.5\n", CONTENT_TYPE_CSV, CONTENT_TYPE_CSV).unwrap();
    let value: f64 = body.trim().parse().unwrap();
    assert!((value - 7.5).abs() < 1e-3, "prediction = {value}");
}
