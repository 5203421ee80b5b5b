//! Readers for the headerless tables written by the preprocess step.
//!
//! Training and test tables carry features followed by the labels in the
//! last `label_count` columns. The table of rows to predict carries an
//! entity id in its first column.

use crate::error::{LearningError, Result, ResultExt};
use ndarray::{Array2, s};
use polars::prelude::*;
use std::path::Path;
use tracing::debug;

/// A feature matrix with its label matrix, row-aligned.
#[derive(Debug, Clone)]
pub struct LabeledTable {
    pub features: Array2<f64>,
    pub labels: Array2<f64>,
}

impl LabeledTable {
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }
}

/// Feature rows keyed by entity id.
#[derive(Debug, Clone)]
pub struct KeyedTable {
    pub ids: Vec<String>,
    pub features: Array2<f64>,
}

/// Read a headerless CSV of numbers into a dense matrix.
///
/// Empty cells and non-numeric values are rejected.
pub fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    let df = read_headerless(path)?;
    frame_to_matrix(&df, 0)
}

/// Read a table and split off its last `label_count` columns as labels.
pub fn read_labeled_table(path: &Path, label_count: usize) -> Result<LabeledTable> {
    let matrix = read_matrix(path).context(format!("Reading {}", path.display()))?;
    split_labels(matrix, label_count)
}

/// Split a matrix into features and its last `label_count` columns.
pub fn split_labels(matrix: Array2<f64>, label_count: usize) -> Result<LabeledTable> {
    let width = matrix.ncols();
    if label_count == 0 || width <= label_count {
        return Err(LearningError::InvalidData(format!(
            "table has {width} columns, need more than {label_count} (features + labels)"
        )));
    }

    let cut = width - label_count;
    let features = matrix.slice(s![.., ..cut]).to_owned();
    let labels = matrix.slice(s![.., cut..]).to_owned();
    debug!(
        "Split {} rows into {} features and {} labels",
        matrix.nrows(),
        cut,
        label_count
    );
    Ok(LabeledTable { features, labels })
}

/// Read a table whose first column is an entity id.
pub fn read_keyed_table(path: &Path) -> Result<KeyedTable> {
    let df = read_headerless(path).context(format!("Reading {}", path.display()))?;
    if df.width() < 2 {
        return Err(LearningError::InvalidData(format!(
            "{} needs an id column and at least one feature",
            path.display()
        )));
    }

    let ids = df.get_columns()[0]
        .as_materialized_series()
        .cast(&DataType::String)?
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect();
    let features = frame_to_matrix(&df, 1)?;
    Ok(KeyedTable { ids, features })
}

fn read_headerless(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(LearningError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }
    if std::fs::read_to_string(path)?.trim().is_empty() {
        return Err(LearningError::InvalidData(format!("{} is empty", path.display())));
    }

    let df = CsvReadOptions::default()
        .with_has_header(false)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Convert every column from `first` on to `f64`, rejecting missing values.
fn frame_to_matrix(df: &DataFrame, first: usize) -> Result<Array2<f64>> {
    let columns = &df.get_columns()[first..];
    let mut values: Vec<Vec<f64>> = Vec::with_capacity(columns.len());

    for (j, column) in columns.iter().enumerate() {
        let casted = column.as_materialized_series().cast(&DataType::Float64)?;
        let ca = casted.f64()?;
        let mut out = Vec::with_capacity(ca.len());
        for (i, value) in ca.into_iter().enumerate() {
            match value {
                Some(v) => out.push(v),
                None => {
                    return Err(LearningError::InvalidData(format!(
                        "row {}, column {}: missing or non-numeric value",
                        i + 1,
                        first + j + 1
                    )));
                }
            }
        }
        values.push(out);
    }

    Ok(Array2::from_shape_fn((df.height(), columns.len()), |(i, j)| {
        values[j][i]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_labels_are_last_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "train.csv", "1,2,10,11\n3,4,12,13\n");

        let table = read_labeled_table(&path, 2).unwrap();
        assert_eq!(table.features, ndarray::array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(table.labels, ndarray::array![[10.0, 11.0], [12.0, 13.0]]);
    }

    #[test]
    fn test_too_few_columns_for_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "train.csv", "1,2\n3,4\n");

        let err = read_labeled_table(&path, 2).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_DATA");
    }

    #[test]
    fn test_missing_cell_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "test.csv", "1,2,3\n4,,6\n");

        let err = read_matrix(&path).unwrap_err();
        assert!(err.to_string().contains("row 2, column 2"));
    }

    #[test]
    fn test_keyed_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "data_to_predict.csv", "101:1,0.5,1.5\n202:2,-1,2\n");

        let table = read_keyed_table(&path).unwrap();
        assert_eq!(table.ids, vec!["101:1".to_string(), "202:2".to_string()]);
        assert_eq!(table.features, ndarray::array![[0.5, 1.5], [-1.0, 2.0]]);
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "empty.csv", "");
        assert_eq!(read_matrix(&path).unwrap_err().error_code(), "INVALID_DATA");
    }
}
