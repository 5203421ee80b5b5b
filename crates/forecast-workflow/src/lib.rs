//! forecast-workflow: the forecasting pipeline as data, and a local runner.
//!
//! [`get_pipeline`] renders a [`PipelineDefinition`] with four top-level
//! steps: preprocess, train, evaluate, and a condition that registers the
//! model only when the evaluation MSE is at or below the configured
//! threshold. [`WorkflowExecutor`] runs a definition step by step on the
//! local filesystem and registers approved models in a [`ModelRegistry`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use forecast_workflow::{get_pipeline, WorkflowConfig, WorkflowExecutor};
//!
//! let config = WorkflowConfig::from_file("workflow.json")?;
//! let definition = get_pipeline(&config);
//! println!("{}", definition.to_json()?);
//!
//! let record = WorkflowExecutor::from_config(&config).build()?.run(&definition)?;
//! if let Some(package) = &record.registered_model {
//!     println!("registered version {}", package.version);
//! }
//! ```

pub mod condition;
pub mod config;
pub mod definition;
pub mod error;
pub mod executor;
pub mod registry;

pub use condition::{Condition, JsonGet, PropertyFile, PropertyStore};
pub use config::{DEFAULT_MSE_THRESHOLD, WorkflowConfig};
pub use definition::{PipelineDefinition, PropertyRef, Step, StepKind, get_pipeline};
pub use error::{Result, ResultExt, WorkflowError};
pub use executor::{
    EXECUTION_FILE, ExecutionRecord, ExecutionStatus, StepEvent, StepRecord, StepStatus,
    WorkflowExecutor, WorkflowExecutorBuilder,
};
pub use registry::{ApprovalStatus, ModelPackage, ModelRegistry, RegistrationRequest};
