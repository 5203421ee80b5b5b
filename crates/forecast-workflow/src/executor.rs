//! Local, sequential execution of a [`PipelineDefinition`].
//!
//! Every execution gets its own run directory under the artifact root and
//! every step its own working directory inside it. Step inputs are copied
//! in from the outputs of earlier steps, so steps never write into each
//! other's directories. The first failing step ends the execution; steps in
//! the condition branch that was not taken are recorded as skipped.

use crate::condition::PropertyStore;
use crate::config::WorkflowConfig;
use crate::definition::{
    ConditionStep, PipelineDefinition, ProcessingJob, ProcessingStep, PropertyRef,
    RegisterModelStep, Step, StepKind, TrainingStep,
};
use crate::error::{Result, ResultExt, WorkflowError};
use crate::registry::{ApprovalStatus, ModelPackage, ModelRegistry, RegistrationRequest};
use chrono::{DateTime, Utc};
use forecast_learning::{Evaluation, Trainer, TrainingConfig};
use forecast_processing::{CancellationToken, DataManifest, LocalObjectStore, ObjectStore, Preprocessor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// File name of the execution record inside the run directory.
pub const EXECUTION_FILE: &str = "execution.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    /// Output name to path, for steps that produce files.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl StepRecord {
    fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Skipped,
            duration_ms: 0,
            outputs: BTreeMap::new(),
            message: Some("condition branch not taken".to_string()),
            error_code: None,
        }
    }
}

/// Record of a whole execution, also written to `execution.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub pipeline_name: String,
    pub execution_id: String,
    pub run_dir: PathBuf,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_model: Option<ModelPackage>,
}

impl ExecutionRecord {
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Notification sent while an execution runs.
#[derive(Debug, Clone)]
pub enum StepEvent {
    Started { step: String },
    Finished(StepRecord),
}

type EventCallback = Arc<dyn Fn(StepEvent) + Send + Sync>;

/// What a successful step leaves for later ones.
struct StepOutcome {
    outputs: BTreeMap<String, PathBuf>,
    message: String,
}

/// State shared by the steps of one execution.
struct ExecutionContext {
    run_dir: PathBuf,
    outputs: HashMap<String, BTreeMap<String, PathBuf>>,
    model_artifacts: HashMap<String, PathBuf>,
    properties: PropertyStore,
    registered: Option<ModelPackage>,
}

impl ExecutionContext {
    fn resolve(&self, reference: &PropertyRef) -> Result<PathBuf> {
        let unresolved = |reason: &str| WorkflowError::UnresolvedProperty {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let path = match reference {
            PropertyRef::ProcessingOutput { step, output, file } => {
                let dir = self
                    .outputs
                    .get(step)
                    .and_then(|outputs| outputs.get(output))
                    .ok_or_else(|| unresolved("step has not produced this output"))?;
                match file {
                    Some(file) => dir.join(file),
                    None => dir.clone(),
                }
            }
            PropertyRef::ModelArtifacts { step } => self
                .model_artifacts
                .get(step)
                .cloned()
                .ok_or_else(|| unresolved("step has not produced model artifacts"))?,
        };

        if !path.exists() {
            return Err(unresolved(&format!("{} does not exist", path.display())));
        }
        Ok(path)
    }
}

/// Runs pipeline definitions step by step on the calling thread.
///
/// # Example
///
/// ```rust,ignore
/// use forecast_workflow::{get_pipeline, WorkflowConfig, WorkflowExecutor};
///
/// let config = WorkflowConfig::from_file("workflow.json")?;
/// let record = WorkflowExecutor::from_config(&config)
///     .on_event(|event| println!("{event:?}"))
///     .build()?
///     .run(&get_pipeline(&config))?;
/// println!("{:?}", record.status);
/// ```
pub struct WorkflowExecutor {
    artifact_root: PathBuf,
    registry: Arc<ModelRegistry>,
    event_callback: Option<EventCallback>,
    cancellation_token: CancellationToken,
}

static_assertions::assert_impl_all!(WorkflowExecutor: Send, Sync);

impl WorkflowExecutor {
    pub fn builder() -> WorkflowExecutorBuilder {
        WorkflowExecutorBuilder::default()
    }

    /// Builder preset with the artifact and registry roots of `config`.
    pub fn from_config(config: &WorkflowConfig) -> WorkflowExecutorBuilder {
        Self::builder()
            .artifact_root(&config.artifact_root)
            .registry(ModelRegistry::new(&config.registry_root))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Execute `definition`.
    ///
    /// Step failures do not surface as `Err`: they end the execution and are
    /// reported in the returned record. `Err` means the execution could not
    /// start or its record could not be written.
    pub fn run(&self, definition: &PipelineDefinition) -> Result<ExecutionRecord> {
        definition.validate()?;

        let started_at = Utc::now();
        let start = Instant::now();
        let execution_id = format!("{}-{}", definition.name, started_at.format("%Y%m%dT%H%M%S%3fZ"));
        let run_dir = unique_dir(&self.artifact_root.join(&execution_id));
        std::fs::create_dir_all(&run_dir).context(format!("Creating {}", run_dir.display()))?;
        info!("Starting execution {} in {}", execution_id, run_dir.display());

        let mut ctx = ExecutionContext {
            run_dir: run_dir.clone(),
            outputs: HashMap::new(),
            model_artifacts: HashMap::new(),
            properties: PropertyStore::new(),
            registered: None,
        };
        let mut records = Vec::new();

        let status = match self.run_steps(&definition.steps, &mut ctx, &mut records) {
            ControlFlow::Continue(()) => ExecutionStatus::Succeeded,
            ControlFlow::Break(status) => status,
        };

        let record = ExecutionRecord {
            pipeline_name: definition.name.clone(),
            execution_id,
            run_dir: run_dir.clone(),
            status,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            steps: records,
            registered_model: ctx.registered,
        };
        std::fs::write(
            run_dir.join(EXECUTION_FILE),
            serde_json::to_string_pretty(&record)?,
        )?;

        info!("Execution {} finished: {:?}", record.execution_id, record.status);
        Ok(record)
    }

    fn run_steps(
        &self,
        steps: &[Step],
        ctx: &mut ExecutionContext,
        records: &mut Vec<StepRecord>,
    ) -> ControlFlow<ExecutionStatus> {
        for step in steps {
            if self.cancellation_token.is_cancelled() {
                warn!("Execution cancelled before step {}", step.name);
                return ControlFlow::Break(ExecutionStatus::Cancelled);
            }

            self.emit(StepEvent::Started {
                step: step.name.clone(),
            });
            let start = Instant::now();

            let result = match &step.kind {
                StepKind::Condition(cond) => self.evaluate_condition(step, cond, ctx),
                _ => self.execute_step(step, ctx).map(|outcome| (outcome, None)),
            };

            let mut record = StepRecord {
                name: step.name.clone(),
                status: StepStatus::Succeeded,
                duration_ms: start.elapsed().as_millis() as u64,
                outputs: BTreeMap::new(),
                message: None,
                error_code: None,
            };

            let branch = match result {
                Ok((outcome, branch)) => {
                    record.outputs = outcome.outputs;
                    record.message = Some(outcome.message);
                    branch
                }
                Err(e) => {
                    error!("Step {} failed: {}", step.name, e);
                    let cancelled = e.is_cancelled();
                    record.status = StepStatus::Failed;
                    record.error_code = Some(e.error_code().to_string());
                    record.message = Some(e.to_string());
                    self.finish(record, records);
                    return ControlFlow::Break(if cancelled {
                        ExecutionStatus::Cancelled
                    } else {
                        ExecutionStatus::Failed
                    });
                }
            };
            self.finish(record, records);

            if let Some((taken, not_taken)) = branch {
                for skipped in not_taken {
                    self.finish(StepRecord::skipped(&skipped.name), records);
                }
                if let ControlFlow::Break(status) = self.run_steps(taken, ctx, records) {
                    return ControlFlow::Break(status);
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn finish(&self, record: StepRecord, records: &mut Vec<StepRecord>) {
        info!("Step {}: {:?}", record.name, record.status);
        self.emit(StepEvent::Finished(record.clone()));
        records.push(record);
    }

    fn emit(&self, event: StepEvent) {
        if let Some(callback) = &self.event_callback {
            callback(event);
        }
    }

    #[allow(clippy::type_complexity)]
    fn evaluate_condition<'s>(
        &self,
        step: &Step,
        cond: &'s ConditionStep,
        ctx: &ExecutionContext,
    ) -> Result<(StepOutcome, Option<(&'s [Step], &'s [Step])>)> {
        let mut met = true;
        for condition in &cond.conditions {
            met &= condition
                .evaluate(&ctx.properties)
                .context(format!("Evaluating {}", step.name))?;
        }
        info!("Step {}: conditions met = {}", step.name, met);

        let branch = if met {
            (cond.if_steps.as_slice(), cond.else_steps.as_slice())
        } else {
            (cond.else_steps.as_slice(), cond.if_steps.as_slice())
        };
        Ok((
            StepOutcome {
                outputs: BTreeMap::new(),
                message: format!("conditions met: {met}"),
            },
            Some(branch),
        ))
    }

    fn execute_step(&self, step: &Step, ctx: &mut ExecutionContext) -> Result<StepOutcome> {
        let step_dir = ctx.run_dir.join(&step.name);
        std::fs::create_dir_all(&step_dir).context(format!("Creating {}", step_dir.display()))?;

        match &step.kind {
            StepKind::Processing(processing) => self.run_processing(step, processing, &step_dir, ctx),
            StepKind::Training(training) => self.run_training(step, training, &step_dir, ctx),
            StepKind::RegisterModel(register) => self.run_register(register, ctx),
            StepKind::Condition(_) => Err(WorkflowError::InvalidDefinition(format!(
                "condition step '{}' cannot be executed as a job",
                step.name
            ))),
        }
        .context(step.name.clone())
    }

    fn run_processing(
        &self,
        step: &Step,
        processing: &ProcessingStep,
        step_dir: &Path,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome> {
        for input in &processing.inputs {
            let source = ctx.resolve(&input.source)?;
            let destination = step_dir.join(&input.destination);
            debug!("Copying {} into {}", source.display(), destination.display());
            copy_into(&source, &destination)?;
        }

        let message = match &processing.job {
            ProcessingJob::Preprocess {
                data_manifest,
                store_root,
                features,
            } => {
                let text = std::fs::read_to_string(data_manifest)
                    .context(format!("Reading data manifest {}", data_manifest.display()))?;
                let manifest = DataManifest::from_json(&text)?;
                let root = store_root.clone().unwrap_or_else(|| PathBuf::from("."));
                let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(root));

                let job_name = processing.job_name.clone();
                let preprocessor = Preprocessor::builder()
                    .config(features.clone())
                    .base_dir(step_dir)
                    .cancellation_token(self.cancellation_token.clone())
                    .on_progress(move |update| {
                        debug!(
                            "[{}] {:>3.0}% {}",
                            job_name,
                            update.progress * 100.0,
                            update.message
                        );
                    })
                    .build()
                    .map_err(|e| WorkflowError::InvalidConfig(e.to_string()))?;
                let outputs = preprocessor.run(manifest, store)?;
                format!(
                    "{} train / {} test rows, {} to predict",
                    outputs.summary.train_rows,
                    outputs.summary.test_rows,
                    outputs.summary.predict_rows
                )
            }
            ProcessingJob::Evaluate { label_count } => {
                let outcome = Evaluation::from_base_dir(step_dir, *label_count).run()?;
                format!(
                    "mse {:.4} over {} test rows",
                    outcome.report.regression_metrics.mse.value, outcome.test_rows
                )
            }
        };

        let outputs: BTreeMap<String, PathBuf> = processing
            .outputs
            .iter()
            .map(|o| (o.output_name.clone(), step_dir.join(&o.source)))
            .collect();

        for file in &processing.property_files {
            let dir = outputs.get(&file.output_name).ok_or_else(|| {
                WorkflowError::InvalidDefinition(format!(
                    "property file '{}' names unknown output '{}'",
                    file.name, file.output_name
                ))
            })?;
            ctx.properties.load(&step.name, file, &dir.join(&file.path))?;
        }

        ctx.outputs.insert(step.name.clone(), outputs.clone());
        Ok(StepOutcome { outputs, message })
    }

    fn run_training(
        &self,
        step: &Step,
        training: &TrainingStep,
        step_dir: &Path,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome> {
        let train = ctx.resolve(&training.train)?;
        let config = TrainingConfig::builder()
            .alpha(training.hyperparameters.alpha)
            .label_count(training.hyperparameters.label_count)
            .build()
            .map_err(|e| WorkflowError::InvalidConfig(e.to_string()))?;

        let outputs = Trainer::new(config).run(
            &train,
            &step_dir.join("model"),
            Some(&step_dir.join("output")),
        )?;
        ctx.model_artifacts
            .insert(step.name.clone(), outputs.model_archive.clone());

        Ok(StepOutcome {
            outputs: BTreeMap::from([("model".to_string(), outputs.model_archive)]),
            message: format!(
                "{} rows, train mse {:.4}",
                outputs.summary.rows, outputs.summary.train_mse
            ),
        })
    }

    fn run_register(&self, register: &RegisterModelStep, ctx: &mut ExecutionContext) -> Result<StepOutcome> {
        let approval_status: ApprovalStatus = register
            .approval_status
            .parse()
            .map_err(WorkflowError::InvalidConfig)?;

        let metrics = match &register.model_metrics {
            Some(reference) => {
                let path = ctx.resolve(reference)?;
                Some(serde_json::from_str(&std::fs::read_to_string(path)?)?)
            }
            None => None,
        };

        let request = RegistrationRequest {
            approval_status,
            content_types: register.content_types.clone(),
            response_types: register.response_types.clone(),
            model_data: ctx.resolve(&register.model_data)?,
            transform_data: register
                .transform_data
                .as_ref()
                .map(|r| ctx.resolve(r))
                .transpose()?,
            metrics,
        };

        let package = self
            .registry
            .register(&register.model_package_group_name, request)?;
        let message = format!("registered {} version {}", package.group, package.version);
        let outputs = BTreeMap::from([("model_package".to_string(), package.model_data.clone())]);
        ctx.registered = Some(package);
        Ok(StepOutcome { outputs, message })
    }
}

/// Builder for [`WorkflowExecutor`].
#[derive(Default)]
pub struct WorkflowExecutorBuilder {
    artifact_root: Option<PathBuf>,
    registry: Option<ModelRegistry>,
    event_callback: Option<EventCallback>,
    cancellation_token: Option<CancellationToken>,
}

impl WorkflowExecutorBuilder {
    /// Directory receiving one run directory per execution.
    pub fn artifact_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_root = Some(path.into());
        self
    }

    pub fn registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set a callback invoked when a step starts and when it finishes.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(StepEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    pub fn build(self) -> Result<WorkflowExecutor> {
        let artifact_root = self
            .artifact_root
            .ok_or_else(|| WorkflowError::InvalidConfig("artifact_root is required".to_string()))?;
        let registry = self.registry.unwrap_or_else(|| {
            ModelRegistry::new(artifact_root.join("registry"))
        });

        Ok(WorkflowExecutor {
            artifact_root,
            registry: Arc::new(registry),
            event_callback: self.event_callback,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
        })
    }
}

/// `path`, or `path-2`, `path-3`... if it already exists.
fn unique_dir(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let mut n = 2;
    loop {
        let candidate = PathBuf::from(format!("{}-{}", path.display(), n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Copy a file into `dest_dir`, or a directory's contents recursively.
fn copy_into(source: &Path, dest_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dest_dir)?;
    if source.is_file() {
        let name = source.file_name().ok_or_else(|| {
            WorkflowError::InvalidDefinition(format!("{} has no file name", source.display()))
        })?;
        std::fs::copy(source, dest_dir.join(name))?;
        return Ok(());
    }

    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            copy_into(&path, &dest_dir.join(entry.file_name()))?;
        } else {
            std::fs::copy(&path, dest_dir.join(entry.file_name()))?;
        }
    }
    Ok(())
}
