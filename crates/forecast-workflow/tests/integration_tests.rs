//! Integration tests for the local pipeline runner.
//!
//! Each test renders the pipeline over the fixture extracts under
//! `tests/fixtures/buckets` and runs it in a temporary artifact root.

use forecast_processing::CancellationToken;
use forecast_workflow::definition::{
    CONDITION_STEP, EVALUATE_STEP, PREPROCESS_STEP, REGISTER_STEP, TRAIN_STEP,
};
use forecast_workflow::{
    EXECUTION_FILE, ExecutionRecord, ExecutionStatus, ModelRegistry, StepEvent, StepStatus,
    WorkflowConfig, WorkflowExecutor, get_pipeline,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// Helper Functions
// ============================================================================

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture_config(root: &Path, mse_threshold: f64) -> WorkflowConfig {
    WorkflowConfig {
        artifact_root: root.join("runs"),
        registry_root: root.join("registry"),
        data_manifest: fixtures_path().join("manifest.json"),
        store_root: Some(fixtures_path().join("buckets")),
        mse_threshold,
        ..Default::default()
    }
}

fn statuses(record: &ExecutionRecord) -> Vec<(&str, StepStatus)> {
    record
        .steps
        .iter()
        .map(|s| (s.name.as_str(), s.status))
        .collect()
}

// ============================================================================
// Full runs
// ============================================================================

#[test]
fn test_passing_gate_registers_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture_config(dir.path(), 1.0e6);

    let record = WorkflowExecutor::from_config(&config)
        .build()
        .unwrap()
        .run(&get_pipeline(&config))
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(
        statuses(&record),
        vec![
            (PREPROCESS_STEP, StepStatus::Succeeded),
            (TRAIN_STEP, StepStatus::Succeeded),
            (EVALUATE_STEP, StepStatus::Succeeded),
            (CONDITION_STEP, StepStatus::Succeeded),
            (REGISTER_STEP, StepStatus::Succeeded),
        ]
    );

    let report = record.run_dir.join(EVALUATE_STEP).join("evaluation/evaluation.json");
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
    assert!(report["regression_metrics"]["mse"]["value"].as_f64().unwrap() >= 0.0);

    let package = record.registered_model.clone().unwrap();
    assert_eq!(package.version, 1);
    assert_eq!(package.group, "ForecastModelPackageGroup");
    assert_eq!(package.metrics, Some(report));
    assert!(record.run_dir.join(EXECUTION_FILE).exists());

    let registry = ModelRegistry::new(&config.registry_root);
    let latest = registry
        .latest_approved(&config.model_package_group_name)
        .unwrap()
        .unwrap();
    assert_eq!(latest.version, package.version);
    assert_eq!(latest.model_data, package.model_data);

    let pipeline = registry.load_pipeline(&latest).unwrap();
    assert!(pipeline.transformer().is_some());
    assert_eq!(pipeline.model().n_outputs(), config.label_count());
}

#[test]
fn test_second_run_gets_next_version() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture_config(dir.path(), 1.0e6);
    let executor = WorkflowExecutor::from_config(&config).build().unwrap();
    let definition = get_pipeline(&config);

    let first = executor.run(&definition).unwrap();
    let second = executor.run(&definition).unwrap();

    assert_ne!(first.run_dir, second.run_dir);
    assert_eq!(second.registered_model.unwrap().version, 2);
}

#[test]
fn test_failing_gate_skips_registration() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture_config(dir.path(), -1.0);

    let record = WorkflowExecutor::from_config(&config)
        .build()
        .unwrap()
        .run(&get_pipeline(&config))
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(record.step(CONDITION_STEP).unwrap().message.as_deref(), Some("conditions met: false"));
    assert_eq!(record.step(REGISTER_STEP).unwrap().status, StepStatus::Skipped);
    assert!(record.registered_model.is_none());
    assert!(
        ModelRegistry::new(&config.registry_root)
            .list(&config.model_package_group_name)
            .unwrap()
            .is_empty()
    );
}

// ============================================================================
// Failures and cancellation
// ============================================================================

#[test]
fn test_missing_manifest_fails_first_step() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixture_config(dir.path(), 1.0e6);
    config.data_manifest = dir.path().join("missing.json");

    let record = WorkflowExecutor::from_config(&config)
        .build()
        .unwrap()
        .run(&get_pipeline(&config))
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.steps.len(), 1);
    let step = record.step(PREPROCESS_STEP).unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.error_code.as_deref(), Some("IO_ERROR"));

    let written: ExecutionRecord = serde_json::from_str(
        &std::fs::read_to_string(record.run_dir.join(EXECUTION_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(written.status, ExecutionStatus::Failed);
}

#[test]
fn test_cancel_between_steps() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture_config(dir.path(), 1.0e6);
    let token = CancellationToken::new();
    let cancel_after_preprocess = token.clone();
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();

    let record = WorkflowExecutor::from_config(&config)
        .cancellation_token(token)
        .on_event(move |event| {
            if let StepEvent::Finished(step) = &event {
                if step.name == PREPROCESS_STEP {
                    cancel_after_preprocess.cancel();
                }
            }
            events_clone.lock().push(event);
        })
        .build()
        .unwrap()
        .run(&get_pipeline(&config))
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert_eq!(statuses(&record), vec![(PREPROCESS_STEP, StepStatus::Succeeded)]);
    assert_eq!(events.lock().len(), 2);
}

#[test]
fn test_invalid_definition_is_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture_config(dir.path(), 1.0e6);
    let mut definition = get_pipeline(&config);
    definition.steps.swap(0, 1);

    let err = WorkflowExecutor::from_config(&config)
        .build()
        .unwrap()
        .run(&definition)
        .unwrap_err();

    assert_eq!(err.error_code(), "INVALID_DEFINITION");
    assert!(!config.artifact_root.exists());
}
