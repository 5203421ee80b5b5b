//! Headerless table writers for step outputs.
//!
//! Downstream steps locate the labels by position (the last N columns), so
//! nothing here writes a header row.

use crate::error::{ProcessingError, Result, ResultExt};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;
use tracing::info;

/// Write `features` followed by `labels` (both row-major) without a header.
pub fn write_feature_table(path: &Path, features: &[Vec<f64>], labels: &[Vec<f64>]) -> Result<()> {
    if !labels.is_empty() && labels.len() != features.len() {
        return Err(ProcessingError::Transform(format!(
            "{} feature rows but {} label rows",
            features.len(),
            labels.len()
        )));
    }

    let rows: Vec<Vec<f64>> = features
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut out = row.clone();
            if let Some(label_row) = labels.get(i) {
                out.extend_from_slice(label_row);
            }
            out
        })
        .collect();

    let mut df = matrix_frame(&rows, None)?;
    write_headerless(path, &mut df)
}

/// Write an id column followed by the feature matrix, without a header.
pub fn write_keyed_table(path: &Path, keys: &[String], features: &[Vec<f64>]) -> Result<()> {
    let mut df = matrix_frame(features, Some(keys))?;
    write_headerless(path, &mut df)
}

fn matrix_frame(rows: &[Vec<f64>], keys: Option<&[String]>) -> Result<DataFrame> {
    let width = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != width) {
        return Err(ProcessingError::Transform("ragged rows in output table".to_string()));
    }

    let mut columns: Vec<Column> = Vec::with_capacity(width + 1);
    if let Some(keys) = keys {
        columns.push(Column::new("id".into(), keys));
    }
    for j in 0..width {
        let values: Vec<f64> = rows.iter().map(|row| row[j]).collect();
        columns.push(Column::new(format!("c{j}").as_str().into(), values));
    }
    Ok(DataFrame::new(columns)?)
}

fn write_headerless(path: &Path, df: &mut DataFrame) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context(format!("creating {}", parent.display()))?;
    }
    let mut file = File::create(path).context(format!("creating {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(false)
        .with_separator(b',')
        .finish(df)?;

    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_labels_are_appended_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train").join("train.csv");

        write_feature_table(&path, &[vec![1.0, 2.0], vec![3.0, 4.0]], &[vec![9.0], vec![8.0]])
            .unwrap();

        let parsed: Vec<Vec<f64>> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| line.split(',').map(|v| v.parse().unwrap()).collect())
            .collect();
        assert_eq!(parsed, vec![vec![1.0, 2.0, 9.0], vec![3.0, 4.0, 8.0]]);
    }

    #[test]
    fn test_keyed_table_starts_with_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data_to_predict.csv");

        write_keyed_table(&path, &["7:1".to_string()], &[vec![0.5]]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "7:1,0.5");
    }

    #[test]
    fn test_mismatched_labels_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_feature_table(&dir.path().join("x.csv"), &[vec![1.0]], &[vec![1.0], vec![2.0]])
            .unwrap_err();
        assert_eq!(err.error_code(), "TRANSFORM_ERROR");
    }
}
