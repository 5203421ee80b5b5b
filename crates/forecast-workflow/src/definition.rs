//! Pipeline definition.
//!
//! [`get_pipeline`] wires preprocessing, training, evaluation and the
//! quality-gated registration into a linear DAG:
//!
//! ```text
//!                                                 . RegisterModel
//!                                                .
//! PreprocessData -> TrainModel -> EvaluateModel -> CheckMSEEvaluation
//!                                                .
//!                                                 . (stop)
//! ```
//!
//! Steps refer to each other's outputs through [`PropertyRef`]s, which the
//! executor resolves to paths once the producing step has run. The whole
//! definition serialises to JSON.

use crate::condition::{Condition, JsonGet, PropertyFile};
use crate::config::WorkflowConfig;
use crate::error::{Result, WorkflowError};
use forecast_processing::FeatureConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

pub const PREPROCESS_STEP: &str = "PreprocessData";
pub const TRAIN_STEP: &str = "TrainModel";
pub const EVALUATE_STEP: &str = "EvaluateModel";
pub const CONDITION_STEP: &str = "CheckMSEEvaluation";
pub const REGISTER_STEP: &str = "RegisterModel";

/// Property file declared by the evaluation step.
pub const EVALUATION_REPORT: &str = "EvaluationReport";

/// Reference to something a previous step produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyRef {
    /// A named output directory of a processing step, optionally a file in it.
    ProcessingOutput {
        step: String,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    /// The packaged model of a training step.
    ModelArtifacts { step: String },
}

impl PropertyRef {
    pub fn output(step: &str, output: &str) -> Self {
        Self::ProcessingOutput {
            step: step.to_string(),
            output: output.to_string(),
            file: None,
        }
    }

    pub fn output_file(step: &str, output: &str, file: &str) -> Self {
        Self::ProcessingOutput {
            step: step.to_string(),
            output: output.to_string(),
            file: Some(file.to_string()),
        }
    }

    pub fn model_artifacts(step: &str) -> Self {
        Self::ModelArtifacts {
            step: step.to_string(),
        }
    }

    /// Name of the step this reference depends on.
    pub fn step(&self) -> &str {
        match self {
            Self::ProcessingOutput { step, .. } | Self::ModelArtifacts { step } => step,
        }
    }
}

impl std::fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessingOutput { step, output, file } => {
                write!(f, "{step}.Outputs['{output}']")?;
                if let Some(file) = file {
                    write!(f, "/{file}")?;
                }
                Ok(())
            }
            Self::ModelArtifacts { step } => write!(f, "{step}.ModelArtifacts"),
        }
    }
}

/// Input copied into a processing step's working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInput {
    pub source: PropertyRef,
    /// Directory relative to the step's base directory.
    pub destination: String,
}

/// Named directory a processing step leaves behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOutput {
    pub output_name: String,
    /// Directory relative to the step's base directory.
    pub source: String,
}

impl ProcessingOutput {
    fn new(name: &str) -> Self {
        Self {
            output_name: name.to_string(),
            source: name.to_string(),
        }
    }
}

/// The work a processing step performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum ProcessingJob {
    Preprocess {
        data_manifest: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        store_root: Option<PathBuf>,
        features: FeatureConfig,
    },
    Evaluate {
        label_count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub job_name: String,
    #[serde(flatten)]
    pub job: ProcessingJob,
    #[serde(default)]
    pub inputs: Vec<ProcessingInput>,
    pub outputs: Vec<ProcessingOutput>,
    #[serde(default)]
    pub property_files: Vec<PropertyFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub alpha: f64,
    pub label_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStep {
    pub job_name: String,
    pub hyperparameters: Hyperparameters,
    pub train: PropertyRef,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionStep {
    pub conditions: Vec<Condition>,
    pub if_steps: Vec<Step>,
    pub else_steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterModelStep {
    pub model_package_group_name: String,
    pub approval_status: String,
    pub content_types: Vec<String>,
    pub response_types: Vec<String>,
    /// Regressor archive.
    pub model_data: PropertyRef,
    /// Transformer archive served in front of the regressor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_data: Option<PropertyRef>,
    /// Evaluation report stored with the package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_metrics: Option<PropertyRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StepKind {
    Processing(ProcessingStep),
    Training(TrainingStep),
    Condition(ConditionStep),
    RegisterModel(RegisterModelStep),
}

/// One named step of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    /// Steps this one reads outputs from.
    pub fn dependencies(&self) -> Vec<&str> {
        match &self.kind {
            StepKind::Processing(step) => step.inputs.iter().map(|i| i.source.step()).collect(),
            StepKind::Training(step) => vec![step.train.step()],
            StepKind::Condition(step) => step.conditions.iter().map(|c| c.left().step.as_str()).collect(),
            StepKind::RegisterModel(step) => std::iter::once(&step.model_data)
                .chain(step.transform_data.iter())
                .chain(step.model_metrics.iter())
                .map(PropertyRef::step)
                .collect(),
        }
    }
}

/// A named, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub steps: Vec<Step>,
}

impl PipelineDefinition {
    /// Find a step by name, including steps nested in condition branches.
    pub fn step(&self, name: &str) -> Option<&Step> {
        fn find<'a>(steps: &'a [Step], name: &str) -> Option<&'a Step> {
            steps.iter().find_map(|step| {
                if step.name == name {
                    return Some(step);
                }
                match &step.kind {
                    StepKind::Condition(cond) => {
                        find(&cond.if_steps, name).or_else(|| find(&cond.else_steps, name))
                    }
                    _ => None,
                }
            })
        }
        find(&self.steps, name)
    }

    /// Check that names are unique and every reference points to an earlier step.
    pub fn validate(&self) -> Result<()> {
        fn walk(steps: &[Step], seen: &mut HashSet<String>) -> Result<()> {
            for step in steps {
                for dependency in step.dependencies() {
                    if !seen.contains(dependency) {
                        return Err(WorkflowError::InvalidDefinition(format!(
                            "step '{}' depends on '{}', which does not run before it",
                            step.name, dependency
                        )));
                    }
                }
                if !seen.insert(step.name.clone()) {
                    return Err(WorkflowError::InvalidDefinition(format!(
                        "duplicate step name '{}'",
                        step.name
                    )));
                }
                if let StepKind::Condition(cond) = &step.kind {
                    let mut branch_seen = seen.clone();
                    walk(&cond.if_steps, &mut branch_seen)?;
                    let mut branch_seen = seen.clone();
                    walk(&cond.else_steps, &mut branch_seen)?;
                }
            }
            Ok(())
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidDefinition("pipeline has no steps".to_string()));
        }
        walk(&self.steps, &mut HashSet::new())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }
}

/// Build the forecasting pipeline for `config`.
pub fn get_pipeline(config: &WorkflowConfig) -> PipelineDefinition {
    let prefix = &config.base_job_prefix;

    let step_process = Step {
        name: PREPROCESS_STEP.to_string(),
        kind: StepKind::Processing(ProcessingStep {
            job_name: format!("{prefix}/preprocess"),
            job: ProcessingJob::Preprocess {
                data_manifest: config.data_manifest.clone(),
                store_root: config.store_root.clone(),
                features: config.features.clone(),
            },
            inputs: Vec::new(),
            outputs: vec![
                ProcessingOutput::new("train"),
                ProcessingOutput::new("test"),
                ProcessingOutput::new("model"),
                ProcessingOutput::new("transform"),
            ],
            property_files: Vec::new(),
        }),
    };

    let step_train = Step {
        name: TRAIN_STEP.to_string(),
        kind: StepKind::Training(TrainingStep {
            job_name: format!("{prefix}/train"),
            hyperparameters: Hyperparameters {
                alpha: config.alpha,
                label_count: config.label_count(),
            },
            train: PropertyRef::output(PREPROCESS_STEP, "train"),
            content_type: "text/csv".to_string(),
        }),
    };

    let evaluation_report = PropertyFile {
        name: EVALUATION_REPORT.to_string(),
        output_name: "evaluation".to_string(),
        path: forecast_learning::EVALUATION_FILE.to_string(),
    };

    let step_eval = Step {
        name: EVALUATE_STEP.to_string(),
        kind: StepKind::Processing(ProcessingStep {
            job_name: format!("{prefix}/evaluate"),
            job: ProcessingJob::Evaluate {
                label_count: config.label_count(),
            },
            inputs: vec![
                ProcessingInput {
                    source: PropertyRef::model_artifacts(TRAIN_STEP),
                    destination: "model".to_string(),
                },
                ProcessingInput {
                    source: PropertyRef::output(PREPROCESS_STEP, "test"),
                    destination: "test".to_string(),
                },
            ],
            outputs: vec![ProcessingOutput::new("evaluation")],
            property_files: vec![evaluation_report.clone()],
        }),
    };

    let step_register = Step {
        name: REGISTER_STEP.to_string(),
        kind: StepKind::RegisterModel(RegisterModelStep {
            model_package_group_name: config.model_package_group_name.clone(),
            approval_status: config.approval_status.clone(),
            content_types: config.content_types.clone(),
            response_types: config.response_types.clone(),
            model_data: PropertyRef::model_artifacts(TRAIN_STEP),
            transform_data: Some(PropertyRef::output_file(
                PREPROCESS_STEP,
                "model",
                forecast_processing::artifacts::MODEL_ARCHIVE,
            )),
            model_metrics: Some(PropertyRef::output_file(
                EVALUATE_STEP,
                &evaluation_report.output_name,
                &evaluation_report.path,
            )),
        }),
    };

    let step_cond = Step {
        name: CONDITION_STEP.to_string(),
        kind: StepKind::Condition(ConditionStep {
            conditions: vec![Condition::LessThanOrEqualTo {
                left: JsonGet::new(EVALUATE_STEP, EVALUATION_REPORT, "regression_metrics.mse.value"),
                right: config.mse_threshold,
            }],
            if_steps: vec![step_register],
            else_steps: Vec::new(),
        }),
    };

    PipelineDefinition {
        name: config.pipeline_name.clone(),
        steps: vec![step_process, step_train, step_eval, step_cond],
    }
}
