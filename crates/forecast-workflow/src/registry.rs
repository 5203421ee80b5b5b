//! Local model registry.
//!
//! Models are grouped into package groups; each registration in a group gets
//! the next version number. A package directory holds the regressor
//! archive, the transformer archive and a `package.json` describing both:
//!
//! ```text
//! {root}/{group}/{version}/
//!     package.json
//!     model.zip        regressor
//!     transform.zip    fitted column transformer (optional)
//! ```

use crate::error::{Result, ResultExt, WorkflowError};
use chrono::{DateTime, Utc};
use forecast_learning::{InferencePipeline, MODEL_FILE, MultiOutputRidge};
use forecast_processing::FittedColumnTransformer;
use forecast_processing::artifacts::read_entry;
use forecast_processing::pipeline::TRANSFORMER_FILE;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

const PACKAGE_FILE: &str = "package.json";
const MODEL_DATA_FILE: &str = "model.zip";
const TRANSFORM_DATA_FILE: &str = "transform.zip";

/// Approval state of a registered model package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Approved,
    PendingManualApproval,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Approved => "Approved",
            Self::PendingManualApproval => "PendingManualApproval",
            Self::Rejected => "Rejected",
        };
        f.write_str(name)
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Approved" => Ok(Self::Approved),
            "PendingManualApproval" => Ok(Self::PendingManualApproval),
            "Rejected" => Ok(Self::Rejected),
            other => Err(format!(
                "unknown approval status '{other}' (expected Approved, PendingManualApproval or Rejected)"
            )),
        }
    }
}

/// What to register.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub approval_status: ApprovalStatus,
    pub content_types: Vec<String>,
    pub response_types: Vec<String>,
    /// Regressor archive produced by training.
    pub model_data: PathBuf,
    /// Transformer archive produced by preprocessing.
    pub transform_data: Option<PathBuf>,
    /// Evaluation report the gate was checked against.
    pub metrics: Option<serde_json::Value>,
}

/// A registered model package, as stored in `package.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPackage {
    pub group: String,
    pub version: u32,
    pub approval_status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub content_types: Vec<String>,
    pub response_types: Vec<String>,
    pub model_data: PathBuf,
    pub transform_data: Option<PathBuf>,
    #[serde(default)]
    pub metrics: Option<serde_json::Value>,
}

/// Directory-backed registry of model package groups.
///
/// Version assignment happens under a lock, so concurrent registrations in
/// one process never receive the same version.
#[derive(Debug)]
pub struct ModelRegistry {
    root: PathBuf,
    lock: Mutex<()>,
}

static_assertions::assert_impl_all!(ModelRegistry: Send, Sync);

impl ModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a new version in `group`.
    pub fn register(&self, group: &str, request: RegistrationRequest) -> Result<ModelPackage> {
        validate_group_name(group)?;
        if !request.model_data.is_file() {
            return Err(WorkflowError::Registry(format!(
                "model data {} does not exist",
                request.model_data.display()
            )));
        }

        let _guard = self.lock.lock();
        let group_dir = self.root.join(group);
        std::fs::create_dir_all(&group_dir).context(format!("Creating {}", group_dir.display()))?;

        let version = self.versions(group)?.last().copied().unwrap_or(0) + 1;
        let package_dir = group_dir.join(version.to_string());
        std::fs::create_dir_all(&package_dir)?;

        let model_data = package_dir.join(MODEL_DATA_FILE);
        std::fs::copy(&request.model_data, &model_data)
            .context(format!("Copying {}", request.model_data.display()))?;

        let transform_data = match &request.transform_data {
            Some(source) => {
                let target = package_dir.join(TRANSFORM_DATA_FILE);
                std::fs::copy(source, &target).context(format!("Copying {}", source.display()))?;
                Some(target)
            }
            None => None,
        };

        let package = ModelPackage {
            group: group.to_string(),
            version,
            approval_status: request.approval_status,
            created_at: Utc::now(),
            content_types: request.content_types,
            response_types: request.response_types,
            model_data,
            transform_data,
            metrics: request.metrics,
        };
        std::fs::write(
            package_dir.join(PACKAGE_FILE),
            serde_json::to_string_pretty(&package)?,
        )?;

        info!(
            "Registered {} version {} ({})",
            group, version, package.approval_status
        );
        Ok(package)
    }

    /// Every package of `group`, oldest first.
    pub fn list(&self, group: &str) -> Result<Vec<ModelPackage>> {
        self.versions(group)?
            .into_iter()
            .map(|version| self.get(group, version))
            .collect()
    }

    pub fn get(&self, group: &str, version: u32) -> Result<ModelPackage> {
        let path = self.root.join(group).join(version.to_string()).join(PACKAGE_FILE);
        let text = std::fs::read_to_string(&path)
            .map_err(|_| WorkflowError::Registry(format!("{group} has no version {version}")))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Most recent approved package of `group`.
    pub fn latest_approved(&self, group: &str) -> Result<Option<ModelPackage>> {
        Ok(self
            .list(group)?
            .into_iter()
            .rev()
            .find(|p| p.approval_status == ApprovalStatus::Approved))
    }

    /// Build the serving pipeline (transformer then regressor) of a package.
    pub fn load_pipeline(&self, package: &ModelPackage) -> Result<InferencePipeline> {
        let model_json = entry_text(&package.model_data, MODEL_FILE)?;
        let mut pipeline = InferencePipeline::new(MultiOutputRidge::from_json(&model_json)?);

        if let Some(transform_data) = &package.transform_data {
            let transformer_json = entry_text(transform_data, TRANSFORMER_FILE)?;
            pipeline = pipeline.with_transformer(FittedColumnTransformer::from_json(&transformer_json)?);
        }
        Ok(pipeline)
    }

    fn versions(&self, group: &str) -> Result<Vec<u32>> {
        let group_dir = self.root.join(group);
        if !group_dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions: Vec<u32> = std::fs::read_dir(&group_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join(PACKAGE_FILE).is_file())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }
}

fn validate_group_name(group: &str) -> Result<()> {
    let valid = !group.is_empty()
        && group
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(WorkflowError::Registry(format!(
            "invalid model package group name '{group}'"
        )))
    }
}

fn entry_text(archive: &Path, name: &str) -> Result<String> {
    let bytes = read_entry(archive, name)?;
    String::from_utf8(bytes).map_err(|_| {
        WorkflowError::Registry(format!("{name} in {} is not UTF-8", archive.display()))
    })
}
