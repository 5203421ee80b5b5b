use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Row and column counts of one preprocess run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessingSummary {
    pub raw_rows: usize,
    /// Rows after re-indexing every entity onto a daily calendar.
    pub imputed_rows: usize,
    pub entities: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predict_date: Option<NaiveDate>,
    pub train_rows: usize,
    pub test_rows: usize,
    pub validation_rows: usize,
    pub predict_rows: usize,
    /// Width of the transformed feature block.
    pub feature_count: usize,
    pub label_count: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ProcessingSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Share of engineered rows usable for training or prediction.
    pub fn usable_percentage(&self) -> f64 {
        if self.imputed_rows == 0 {
            return 0.0;
        }
        let usable = self.train_rows + self.test_rows + self.validation_rows + self.predict_rows;
        usable as f64 / self.imputed_rows as f64 * 100.0
    }
}

/// Files written by the preprocess step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessOutputs {
    pub train: PathBuf,
    pub test: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<PathBuf>,
    pub data_to_predict: PathBuf,
    /// `model.zip` holding the fitted column transformer.
    pub transformer_archive: PathBuf,
    pub summary: ProcessingSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_percentage() {
        let summary = ProcessingSummary {
            imputed_rows: 200,
            train_rows: 80,
            test_rows: 15,
            predict_rows: 5,
            ..Default::default()
        };
        assert!((summary.usable_percentage() - 50.0).abs() < 1e-9);
        assert_eq!(ProcessingSummary::new().usable_percentage(), 0.0);
    }

    #[test]
    fn test_summary_skips_empty_fields() {
        let json = serde_json::to_string(&ProcessingSummary::new()).unwrap();
        assert!(!json.contains("warnings"));
        assert!(!json.contains("predict_date"));
    }
}
