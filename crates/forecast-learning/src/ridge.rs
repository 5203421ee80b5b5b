//! Multi-output ridge regression.
//!
//! One L2-regularised linear model per output, all sharing the same
//! features. Each output minimises `||y - Xβ - b||² + α||β||²`; with an
//! intercept the problem is solved on centred data and `b` recovered from
//! the means. Since every output shares `X'X + αI`, the Cholesky factor is
//! computed once and reused for each right-hand side.

use crate::config::TrainingConfig;
use crate::error::{LearningError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// File name of a serialized regressor.
pub const MODEL_FILE: &str = "model.json";

/// Diagonal jitter used when `alpha` is zero, so collinear features still factor.
const MIN_DIAGONAL: f64 = 1e-10;

/// A fitted multi-output ridge regressor.
///
/// Coefficients are stored row-per-output so the JSON form reads naturally
/// (`coefficients[k]` are the weights of output `k`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiOutputRidge {
    alpha: f64,
    fit_intercept: bool,
    n_features: usize,
    coefficients: Vec<Vec<f64>>,
    intercepts: Vec<f64>,
}

impl MultiOutputRidge {
    /// Fit one ridge model per column of `y`.
    ///
    /// # Errors
    ///
    /// - [`LearningError::InvalidData`] when `x` and `y` disagree on rows, either
    ///   is empty, or a value is not finite
    /// - [`LearningError::TrainingFailed`] when the normal equations cannot be
    ///   factored
    pub fn fit(x: ArrayView2<f64>, y: ArrayView2<f64>, config: &TrainingConfig) -> Result<Self> {
        let (n_samples, n_features) = x.dim();
        let n_outputs = y.ncols();

        if n_samples == 0 || n_features == 0 || n_outputs == 0 {
            return Err(LearningError::InvalidData(format!(
                "cannot fit on {n_samples} rows, {n_features} features and {n_outputs} outputs"
            )));
        }
        if y.nrows() != n_samples {
            return Err(LearningError::InvalidData(format!(
                "{} feature rows but {} label rows",
                n_samples,
                y.nrows()
            )));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(LearningError::InvalidData(
                "training data contains NaN or infinite values".to_string(),
            ));
        }

        let (x_mean, y_mean) = if config.fit_intercept {
            (column_means(x), column_means(y))
        } else {
            (Array1::zeros(n_features), Array1::zeros(n_outputs))
        };
        let xc = &x - &x_mean;
        let yc = &y - &y_mean;

        let mut gram = xc.t().dot(&xc);
        let penalty = config.alpha.max(MIN_DIAGONAL);
        for i in 0..n_features {
            gram[[i, i]] += penalty;
        }
        let rhs = xc.t().dot(&yc);

        let lower = cholesky(&gram).ok_or_else(|| {
            LearningError::TrainingFailed(format!(
                "normal equations are not positive definite (alpha = {})",
                config.alpha
            ))
        })?;

        let mut coefficients = Vec::with_capacity(n_outputs);
        let mut intercepts = Vec::with_capacity(n_outputs);
        for (k, column) in rhs.axis_iter(Axis(1)).enumerate() {
            let beta = cholesky_solve(&lower, &column.to_owned());
            let intercept = y_mean[k] - x_mean.dot(&beta);
            debug!("Output {}: intercept {:.4}", k, intercept);
            coefficients.push(beta.to_vec());
            intercepts.push(intercept);
        }

        info!(
            "Fitted ridge (alpha = {}) on {} rows x {} features for {} outputs",
            config.alpha, n_samples, n_features, n_outputs
        );

        Ok(Self {
            alpha: config.alpha,
            fit_intercept: config.fit_intercept,
            n_features,
            coefficients,
            intercepts,
        })
    }

    /// Predict every output for each row of `x`.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features {
            return Err(LearningError::InferenceError(format!(
                "model expects {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }

        let weights = Array2::from_shape_fn((self.n_outputs(), self.n_features), |(k, j)| {
            self.coefficients[k][j]
        });
        let intercepts = Array1::from_vec(self.intercepts.clone());
        Ok(x.dot(&weights.t()) + &intercepts)
    }

    /// Predict for row-major input.
    pub fn predict_rows(&self, rows: &[Vec<f64>]) -> Result<Array2<f64>> {
        let x = rows_to_array(rows, self.n_features)?;
        self.predict(x.view())
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn fit_intercept(&self) -> bool {
        self.fit_intercept
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_outputs(&self) -> usize {
        self.intercepts.len()
    }

    /// Weights of output `k`.
    pub fn coefficients(&self, k: usize) -> Option<&[f64]> {
        self.coefficients.get(k).map(Vec::as_slice)
    }

    pub fn intercepts(&self) -> &[f64] {
        &self.intercepts
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(json)?;
        if model.coefficients.len() != model.intercepts.len()
            || model.coefficients.iter().any(|c| c.len() != model.n_features)
        {
            return Err(LearningError::InvalidData(
                "serialized model has inconsistent coefficient shapes".to_string(),
            ));
        }
        Ok(model)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load a model written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LearningError::ModelNotFound {
                path: path.display().to_string(),
            });
        }
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

static_assertions::assert_impl_all!(MultiOutputRidge: Send, Sync);

/// Convert row-major rows into a matrix of `width` columns.
pub(crate) fn rows_to_array(rows: &[Vec<f64>], width: usize) -> Result<Array2<f64>> {
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != width) {
        return Err(LearningError::InvalidData(format!(
            "row {} has {} values, expected {}",
            i + 1,
            row.len(),
            width
        )));
    }
    Ok(Array2::from_shape_fn((rows.len(), width), |(i, j)| rows[i][j]))
}

fn column_means(a: ArrayView2<f64>) -> Array1<f64> {
    a.mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(a.ncols()))
}

/// Lower-triangular `L` with `A = L Lᵀ`, or `None` if `A` is not positive definite.
fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solve `L Lᵀ x = b` by forward then backward substitution.
fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();

    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * z[j];
        }
        z[i] = (b[i] - sum) / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (z[i] - sum) / l[[i, i]];
    }
    x
}
