//! Conditions evaluated by a condition step.
//!
//! The left side of a comparison is a [`JsonGet`]: a dotted path into a
//! property file written by an earlier step (for example the evaluation
//! report's `regression_metrics.mse.value`).

use crate::error::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// A JSON file produced by a step and declared for later lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFile {
    /// Name conditions refer to.
    pub name: String,
    /// Step output holding the file.
    pub output_name: String,
    /// File path inside that output.
    pub path: String,
}

/// Lookup of a value inside a step's property file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonGet {
    pub step: String,
    pub property_file: String,
    pub json_path: String,
}

impl JsonGet {
    pub fn new(step: impl Into<String>, property_file: impl Into<String>, json_path: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            property_file: property_file.into(),
            json_path: json_path.into(),
        }
    }

    /// Resolve to a number against the loaded property files.
    pub fn resolve(&self, properties: &PropertyStore) -> Result<f64> {
        let document = properties.get(&self.step, &self.property_file).ok_or_else(|| {
            WorkflowError::UnresolvedProperty {
                reference: format!("{}.{}", self.step, self.property_file),
                reason: "property file was not produced".to_string(),
            }
        })?;

        json_path_get(document, &self.json_path)
            .and_then(Value::as_f64)
            .ok_or_else(|| WorkflowError::PropertyNotFound {
                file: self.property_file.clone(),
                path: self.json_path.clone(),
            })
    }
}

/// Follow a dotted path such as `regression_metrics.mse.value` or
/// `metrics[0].value` through a JSON document.
pub fn json_path_get<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (key, indices) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index in indices.split('[').filter(|s| !s.is_empty()) {
            let index: usize = index.strip_suffix(']')?.parse().ok()?;
            current = current.get(index)?;
        }
    }
    Some(current)
}

/// Numeric comparisons between a property and a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Condition {
    LessThanOrEqualTo { left: JsonGet, right: f64 },
    LessThan { left: JsonGet, right: f64 },
    GreaterThanOrEqualTo { left: JsonGet, right: f64 },
    GreaterThan { left: JsonGet, right: f64 },
}

impl Condition {
    pub fn left(&self) -> &JsonGet {
        match self {
            Self::LessThanOrEqualTo { left, .. }
            | Self::LessThan { left, .. }
            | Self::GreaterThanOrEqualTo { left, .. }
            | Self::GreaterThan { left, .. } => left,
        }
    }

    pub fn evaluate(&self, properties: &PropertyStore) -> Result<bool> {
        let value = self.left().resolve(properties)?;
        let outcome = match self {
            Self::LessThanOrEqualTo { right, .. } => value <= *right,
            Self::LessThan { right, .. } => value < *right,
            Self::GreaterThanOrEqualTo { right, .. } => value >= *right,
            Self::GreaterThan { right, .. } => value > *right,
        };
        debug!("{:?} on {} -> {}", self, value, outcome);
        Ok(outcome)
    }
}

/// Property files loaded during an execution, keyed by step and file name.
#[derive(Debug, Default, Clone)]
pub struct PropertyStore {
    files: HashMap<(String, String), Value>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, step: impl Into<String>, name: impl Into<String>, document: Value) {
        self.files.insert((step.into(), name.into()), document);
    }

    /// Read and register a property file from disk.
    pub fn load(&mut self, step: &str, file: &PropertyFile, path: &Path) -> Result<()> {
        let document: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        self.insert(step, file.name.clone(), document);
        Ok(())
    }

    pub fn get(&self, step: &str, name: &str) -> Option<&Value> {
        self.files.get(&(step.to_string(), name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_mse(mse: f64) -> PropertyStore {
        let mut store = PropertyStore::new();
        store.insert(
            "EvaluateModel",
            "EvaluationReport",
            json!({"regression_metrics": {"mse": {"value": mse, "standard_deviation": 1.0}}}),
        );
        store
    }

    fn mse_gate(threshold: f64) -> Condition {
        Condition::LessThanOrEqualTo {
            left: JsonGet::new("EvaluateModel", "EvaluationReport", "regression_metrics.mse.value"),
            right: threshold,
        }
    }

    #[test]
    fn test_gate_branches_on_threshold() {
        assert!(mse_gate(6.0).evaluate(&store_with_mse(5.9)).unwrap());
        assert!(mse_gate(6.0).evaluate(&store_with_mse(6.0)).unwrap());
        assert!(!mse_gate(6.0).evaluate(&store_with_mse(6.1)).unwrap());
    }

    #[test]
    fn test_other_comparisons() {
        let left = JsonGet::new("EvaluateModel", "EvaluationReport", "regression_metrics.mse.value");
        let store = store_with_mse(2.0);
        assert!(!Condition::LessThan { left: left.clone(), right: 2.0 }.evaluate(&store).unwrap());
        assert!(Condition::GreaterThanOrEqualTo { left: left.clone(), right: 2.0 }.evaluate(&store).unwrap());
        assert!(!Condition::GreaterThan { left, right: 2.0 }.evaluate(&store).unwrap());
    }

    #[test]
    fn test_missing_path_and_file() {
        let store = store_with_mse(1.0);
        let bad_path = Condition::LessThanOrEqualTo {
            left: JsonGet::new("EvaluateModel", "EvaluationReport", "regression_metrics.rmse.value"),
            right: 1.0,
        };
        assert_eq!(bad_path.evaluate(&store).unwrap_err().error_code(), "PROPERTY_NOT_FOUND");

        let err = mse_gate(1.0).evaluate(&PropertyStore::new()).unwrap_err();
        assert_eq!(err.error_code(), "UNRESOLVED_PROPERTY");
    }

    #[test]
    fn test_json_path_indices() {
        let doc = json!({"metrics": [{"value": 1}, {"value": 2}]});
        assert_eq!(json_path_get(&doc, "metrics[1].value"), Some(&json!(2)));
        assert_eq!(json_path_get(&doc, "metrics[5].value"), None);
        assert_eq!(json_path_get(&doc, "metrics[x]"), None);
    }

    #[test]
    fn test_condition_serializes_with_type_tag() {
        let json = serde_json::to_value(mse_gate(6.0)).unwrap();
        assert_eq!(json["type"], "LessThanOrEqualTo");
        assert_eq!(json["right"], 6.0);
        assert_eq!(json["left"]["json_path"], "regression_metrics.mse.value");
    }
}
