//! Column transforms fitted on the training partition.
//!
//! Numeric columns are median-imputed then standard-scaled; categorical
//! columns are filled with a constant then one-hot encoded. The fitted
//! transformer serializes to JSON so the inference side can apply exactly
//! the statistics learned at training time.
//!
//! Output column order: all numeric columns (declaration order), then the
//! one-hot columns of each categorical column.

use crate::error::{ProcessingError, Result};
use crate::imputers::StatisticalImputer;
use crate::utils::{numeric_values, string_values};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Fill value for missing categorical entries.
pub const MISSING_CATEGORY: &str = "missing";

/// How a column is treated by the transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// A column the transformer consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

/// Unfitted transformer: the list of input columns and their kinds.
#[derive(Debug, Clone, Default)]
pub struct ColumnTransformer {
    columns: Vec<ColumnSpec>,
}

impl ColumnTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn numeric<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(names.into_iter().map(|name| ColumnSpec {
            name: name.into(),
            kind: ColumnKind::Numeric,
        }));
        self
    }

    pub fn categorical<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(names.into_iter().map(|name| ColumnSpec {
            name: name.into(),
            kind: ColumnKind::Categorical,
        }));
        self
    }

    /// Learn imputation, scaling and category statistics from `df`.
    pub fn fit(&self, df: &DataFrame) -> Result<FittedColumnTransformer> {
        if self.columns.is_empty() {
            return Err(ProcessingError::Transform(
                "no columns configured for the transformer".to_string(),
            ));
        }

        debug!("Fitting transforms on {} rows", df.height());
        let mut numeric = Vec::new();
        let mut categorical = Vec::new();

        for spec in &self.columns {
            match spec.kind {
                ColumnKind::Numeric => {
                    let values = numeric_values(df, &spec.name)?;
                    numeric.push(NumericStats::fit(&spec.name, &values)?);
                }
                ColumnKind::Categorical => {
                    let values = string_values(df, &spec.name)?;
                    categorical.push(CategoricalStats::fit(&spec.name, &values));
                }
            }
        }

        Ok(FittedColumnTransformer {
            input_columns: self.columns.clone(),
            numeric,
            categorical,
        })
    }
}

/// Median imputation and standard scaling statistics of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub name: String,
    pub median: f64,
    pub mean: f64,
    pub scale: f64,
}

impl NumericStats {
    fn fit(name: &str, values: &[Option<f64>]) -> Result<Self> {
        let median = StatisticalImputer::median(values).ok_or_else(|| {
            ProcessingError::Transform(format!("column '{name}' has no values to fit on"))
        })?;
        let imputed = StatisticalImputer::fill_numeric(values, median);

        let n = imputed.len() as f64;
        let mean = imputed.iter().sum::<f64>() / n;
        let variance = imputed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();
        // constant columns pass through centred but unscaled
        let scale = if std < 1e-12 { 1.0 } else { std };

        Ok(Self {
            name: name.to_string(),
            median,
            mean,
            scale,
        })
    }

    fn apply(&self, value: Option<f64>) -> f64 {
        let v = match value {
            Some(v) if !v.is_nan() => v,
            _ => self.median,
        };
        (v - self.mean) / self.scale
    }
}

/// One-hot categories of one column, sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalStats {
    pub name: String,
    pub categories: Vec<String>,
}

impl CategoricalStats {
    fn fit(name: &str, values: &[Option<String>]) -> Self {
        let mut categories = StatisticalImputer::fill_categorical(values, MISSING_CATEGORY);
        categories.sort();
        categories.dedup();
        Self {
            name: name.to_string(),
            categories,
        }
    }

    /// Unknown categories encode as all zeros.
    fn apply(&self, value: Option<&str>, out: &mut Vec<f64>) {
        let value = value.unwrap_or(MISSING_CATEGORY);
        out.extend(
            self.categories
                .iter()
                .map(|c| if c == value { 1.0 } else { 0.0 }),
        );
    }

    fn output_names(&self) -> impl Iterator<Item = String> + '_ {
        self.categories
            .iter()
            .map(move |c| format!("{}_{}", self.name, c))
    }
}

/// Transformer with learned statistics, ready to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedColumnTransformer {
    input_columns: Vec<ColumnSpec>,
    numeric: Vec<NumericStats>,
    categorical: Vec<CategoricalStats>,
}

impl FittedColumnTransformer {
    /// Input columns in declaration order.
    pub fn input_columns(&self) -> &[ColumnSpec] {
        &self.input_columns
    }

    pub fn numeric_stats(&self) -> &[NumericStats] {
        &self.numeric
    }

    pub fn categorical_stats(&self) -> &[CategoricalStats] {
        &self.categorical
    }

    /// Names of the produced columns.
    pub fn output_columns(&self) -> Vec<String> {
        self.numeric
            .iter()
            .map(|s| s.name.clone())
            .chain(self.categorical.iter().flat_map(|c| c.output_names()))
            .collect()
    }

    pub fn n_outputs(&self) -> usize {
        self.numeric.len() + self.categorical.iter().map(|c| c.categories.len()).sum::<usize>()
    }

    /// Transform a frame into a dense row-major matrix.
    pub fn transform(&self, df: &DataFrame) -> Result<Vec<Vec<f64>>> {
        let numeric = self
            .numeric
            .iter()
            .map(|s| numeric_values(df, &s.name))
            .collect::<Result<Vec<_>>>()?;
        let categorical = self
            .categorical
            .iter()
            .map(|c| string_values(df, &c.name))
            .collect::<Result<Vec<_>>>()?;

        let rows = (0..df.height())
            .map(|row| {
                let mut out = Vec::with_capacity(self.n_outputs());
                for (stats, column) in self.numeric.iter().zip(&numeric) {
                    out.push(stats.apply(column[row]));
                }
                for (stats, column) in self.categorical.iter().zip(&categorical) {
                    stats.apply(column[row].as_deref(), &mut out);
                }
                out
            })
            .collect();
        Ok(rows)
    }

    /// Transform raw records whose fields follow [`input_columns`](Self::input_columns).
    ///
    /// Empty fields count as missing.
    pub fn transform_records(&self, records: &[Vec<String>]) -> Result<Vec<Vec<f64>>> {
        records
            .iter()
            .enumerate()
            .map(|(line, fields)| self.transform_record(line, fields))
            .collect()
    }

    fn transform_record(&self, line: usize, fields: &[String]) -> Result<Vec<f64>> {
        if fields.len() != self.input_columns.len() {
            return Err(ProcessingError::Transform(format!(
                "record {} has {} fields, expected {}",
                line + 1,
                fields.len(),
                self.input_columns.len()
            )));
        }

        let field = |name: &str| -> Option<&str> {
            self.input_columns
                .iter()
                .position(|c| c.name == name)
                .map(|i| fields[i].trim())
                .filter(|f| !f.is_empty())
        };

        let mut out = Vec::with_capacity(self.n_outputs());
        for stats in &self.numeric {
            let value = match field(&stats.name) {
                Some(raw) => Some(raw.parse::<f64>().map_err(|_| {
                    ProcessingError::Transform(format!(
                        "record {}: '{}' is not numeric for column '{}'",
                        line + 1,
                        raw,
                        stats.name
                    ))
                })?),
                None => None,
            };
            out.push(stats.apply(value));
        }
        for stats in &self.categorical {
            stats.apply(field(&stats.name), &mut out);
        }
        Ok(out)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FEATURES: [&str; 7] = [
        "length",
        "diameter",
        "height",
        "whole_weight",
        "shucked_weight",
        "viscera_weight",
        "shell_weight",
    ];

    fn abalone_frame() -> DataFrame {
        df![
            "sex" => ["M", "F", "I"],
            "length" => [5.0, 3.0, 2.0],
            "diameter" => [0.3, 0.2, 0.5],
            "height" => [1.0, 2.0, 3.0],
            "whole_weight" => [0.3, 0.2, 0.1],
            "shucked_weight" => [2.0, 1.0, 1.0],
            "viscera_weight" => [1.0, 3.0, 2.0],
            "shell_weight" => [0.0, 0.0, 0.0],
        ]
        .unwrap()
    }

    fn round2(rows: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
        rows.into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|v| {
                        let r = (v * 100.0).round() / 100.0;
                        if r == 0.0 { 0.0 } else { r }
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_process_data_matches_expected_matrix() {
        let transformer = ColumnTransformer::new()
            .categorical(["sex"])
            .numeric(FEATURES);
        let fitted = transformer.fit(&abalone_frame()).unwrap();
        let output = round2(fitted.transform(&abalone_frame()).unwrap());

        let expected = vec![
            vec![1.34, -0.27, -1.22, 1.22, 1.41, -1.22, 0.0, 0.0, 0.0, 1.0],
            vec![-0.27, -1.07, 0.0, 0.0, -0.71, 1.22, 0.0, 1.0, 0.0, 0.0],
            vec![-1.07, 1.34, 1.22, -1.22, -0.71, 0.0, 0.0, 0.0, 1.0, 0.0],
        ];
        assert_eq!(output, expected);
        assert_eq!(
            fitted.output_columns()[7..],
            ["sex_F".to_string(), "sex_I".to_string(), "sex_M".to_string()]
        );
    }

    #[test]
    fn test_missing_values_use_median_and_missing_category() {
        let df = df![
            "x" => [Some(1.0), None, Some(3.0)],
            "c" => [Some("a"), None, Some("a")],
        ]
        .unwrap();
        let fitted = ColumnTransformer::new()
            .numeric(["x"])
            .categorical(["c"])
            .fit(&df)
            .unwrap();

        assert_eq!(fitted.numeric_stats()[0].median, 2.0);
        assert_eq!(fitted.categorical_stats()[0].categories, vec!["a", "missing"]);

        let rows = fitted.transform(&df).unwrap();
        assert_eq!(rows[1][0], 0.0); // median 2 equals the mean of [1, 2, 3]
        assert_eq!(rows[1][1..], [0.0, 1.0]);
    }

    #[test]
    fn test_unknown_category_encodes_as_zeros() {
        let df = df!["c" => ["a", "b"]].unwrap();
        let fitted = ColumnTransformer::new().categorical(["c"]).fit(&df).unwrap();

        let other = df!["c" => ["z"]].unwrap();
        assert_eq!(fitted.transform(&other).unwrap(), vec![vec![0.0, 0.0]]);
    }

    #[test]
    fn test_transform_records_follow_input_order() {
        let fitted = ColumnTransformer::new()
            .categorical(["sex"])
            .numeric(FEATURES)
            .fit(&abalone_frame())
            .unwrap();

        let record: Vec<String> = "M,5,0.3,1,0.3,2,1,0".split(',').map(String::from).collect();
        let from_records = fitted.transform_records(&[record]).unwrap();
        let from_frame = fitted.transform(&abalone_frame()).unwrap();
        assert_eq!(from_records[0], from_frame[0]);
    }

    #[test]
    fn test_transform_records_rejects_bad_input() {
        let fitted = ColumnTransformer::new()
            .numeric(["x"])
            .fit(&df!["x" => [1.0, 2.0]].unwrap())
            .unwrap();

        assert!(fitted.transform_records(&[vec!["abc".to_string()]]).is_err());
        assert!(
            fitted
                .transform_records(&[vec!["1".to_string(), "2".to_string()]])
                .is_err()
        );
        // empty field is imputed with the median
        let rows = fitted.transform_records(&[vec![String::new()]]).unwrap();
        assert_eq!(rows[0][0], 0.0);
    }

    #[test]
    fn test_fit_fails_on_all_missing_numeric() {
        let df = df!["x" => [Option::<f64>::None, None]].unwrap();
        let err = ColumnTransformer::new().numeric(["x"]).fit(&df).unwrap_err();
        assert_eq!(err.error_code(), "TRANSFORM_ERROR");
    }

    #[test]
    fn test_json_persistence() {
        let fitted = ColumnTransformer::new()
            .numeric(["x"])
            .fit(&df!["x" => [1.0, 2.0, 4.0]].unwrap())
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transform.json");

        fitted.save(&path).unwrap();
        assert_eq!(FittedColumnTransformer::load(&path).unwrap(), fitted);
    }
}
