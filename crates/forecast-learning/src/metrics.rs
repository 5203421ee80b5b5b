//! Regression metrics over multi-output predictions.

use crate::error::{LearningError, Result};
use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// One metric value, optionally with the spread it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_deviation: Option<f64>,
}

impl MetricValue {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            standard_deviation: None,
        }
    }
}

/// Held-out error metrics of a multi-output regressor.
///
/// `mse` averages the per-output errors uniformly; its standard deviation is
/// the population standard deviation of every residual in the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mse: MetricValue,
    pub rmse: MetricValue,
    pub mae: MetricValue,
    /// Coefficient of determination, averaged uniformly over outputs.
    pub r2: MetricValue,
    /// MSE of each output, nearest horizon first.
    #[serde(default)]
    pub mse_per_horizon: Vec<f64>,
}

/// Compute [`RegressionMetrics`] for aligned truth and prediction matrices.
pub fn regression_metrics(y_true: ArrayView2<f64>, y_pred: ArrayView2<f64>) -> Result<RegressionMetrics> {
    if y_true.dim() != y_pred.dim() {
        return Err(LearningError::InvalidData(format!(
            "truth has shape {:?} but predictions have shape {:?}",
            y_true.dim(),
            y_pred.dim()
        )));
    }
    let (n_rows, n_outputs) = y_true.dim();
    if n_rows == 0 || n_outputs == 0 {
        return Err(LearningError::InvalidData(
            "cannot score an empty prediction table".to_string(),
        ));
    }

    let residuals = &y_true - &y_pred;
    let count = (n_rows * n_outputs) as f64;

    let mse_per_horizon: Vec<f64> = residuals
        .axis_iter(Axis(1))
        .map(|column| column.iter().map(|r| r * r).sum::<f64>() / n_rows as f64)
        .collect();
    let mse = mse_per_horizon.iter().sum::<f64>() / n_outputs as f64;

    let mean_residual = residuals.sum() / count;
    let variance = residuals
        .iter()
        .map(|r| (r - mean_residual).powi(2))
        .sum::<f64>()
        / count;
    let mae = residuals.iter().map(|r| r.abs()).sum::<f64>() / count;

    let r2 = y_true
        .axis_iter(Axis(1))
        .zip(residuals.axis_iter(Axis(1)))
        .map(|(truth, residual)| {
            let mean = truth.sum() / n_rows as f64;
            let ss_tot: f64 = truth.iter().map(|t| (t - mean).powi(2)).sum();
            let ss_res: f64 = residual.iter().map(|r| r * r).sum();
            if ss_tot == 0.0 {
                if ss_res == 0.0 { 1.0 } else { 0.0 }
            } else {
                1.0 - ss_res / ss_tot
            }
        })
        .sum::<f64>()
        / n_outputs as f64;

    Ok(RegressionMetrics {
        mse: MetricValue {
            value: mse,
            standard_deviation: Some(variance.sqrt()),
        },
        rmse: MetricValue::new(mse.sqrt()),
        mae: MetricValue::new(mae),
        r2: MetricValue::new(r2),
        mse_per_horizon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_perfect_predictions() {
        let y = array![[1.0, 2.0], [3.0, 5.0]];
        let metrics = regression_metrics(y.view(), y.view()).unwrap();

        assert_eq!(metrics.mse.value, 0.0);
        assert_eq!(metrics.mse.standard_deviation, Some(0.0));
        assert_eq!(metrics.r2.value, 1.0);
    }

    #[test]
    fn test_known_errors() {
        let truth = array![[1.0, 0.0], [3.0, 0.0]];
        let pred = array![[2.0, 0.0], [1.0, 2.0]];
        // residuals: [-1, 0], [2, -2]
        let metrics = regression_metrics(truth.view(), pred.view()).unwrap();

        assert_eq!(metrics.mse_per_horizon, vec![2.5, 2.0]);
        assert_eq!(metrics.mse.value, 2.25);
        assert_eq!(metrics.mae.value, 1.25);
        assert!((metrics.rmse.value - 1.5).abs() < 1e-12);
        // mean residual -0.25, variance (0.5625 + 0.0625 + 5.0625 + 3.0625) / 4
        let std = metrics.mse.standard_deviation.unwrap();
        assert!((std - (8.75f64 / 4.0).sqrt()).abs() < 1e-12);
        // output 0: ss_tot 2, ss_res 5 -> -1.5; output 1 is constant with errors -> 0
        assert!((metrics.r2.value - (-0.75)).abs() < 1e-12);
    }

    #[test]
    fn test_shape_mismatch() {
        let truth = array![[1.0, 2.0]];
        let pred = array![[1.0]];
        assert!(regression_metrics(truth.view(), pred.view()).is_err());
    }

    #[test]
    fn test_report_shape() {
        let y = array![[1.0], [2.0]];
        let metrics = regression_metrics(y.view(), y.view()).unwrap();
        let json = serde_json::to_value(&metrics).unwrap();

        assert!(json["mse"]["standard_deviation"].is_number());
        assert!(json["rmse"].get("standard_deviation").is_none());
    }
}
