//! Linear quantile regression.
//!
//! Minimises the check loss `Σ ρ_τ(y_i − x_iᵀβ)` with
//! `ρ_τ(r) = r (τ − 1[r < 0])` using the MM algorithm of Hunter & Lange
//! (2000). Each step majorises a slightly perturbed check loss by a
//! quadratic and solves the weighted normal equations
//!
//! `XᵀWX β = XᵀWy + (2τ − 1) Xᵀ1`, with `w_i = 1 / (ε + |r_i|)`.
//!
//! The iteration starts from the OLS solution.

use crate::data::DesignMatrix;
use crate::error::{CasiError, Result};
use crate::model::lm::xtx_inverse;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Configuration for quantile regression fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileConfig {
    /// Maximum MM iterations.
    pub max_iter: usize,
    /// Relative convergence tolerance on coefficients and objective.
    pub tol: f64,
    /// Perturbation of the check loss near zero residuals.
    pub epsilon: f64,
}

impl Default for QuantileConfig {
    fn default() -> Self {
        Self {
            max_iter: 10_000,
            tol: 1e-9,
            epsilon: 1e-6,
        }
    }
}

/// Results from fitting one conditional quantile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantileFit {
    /// Quantile level in (0, 1).
    pub tau: f64,
    /// Coefficient names from the design matrix.
    pub coefficient_names: Vec<String>,
    /// Estimated coefficients.
    pub coefficients: Vec<f64>,
    /// Check loss at the solution.
    pub objective: f64,
    /// Number of MM iterations.
    pub iterations: usize,
    /// Whether the iteration met the tolerance.
    pub converged: bool,
}

impl QuantileFit {
    /// Get coefficient by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.coefficient_names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.coefficients.get(i).copied())
    }

    /// Linear predictor `Xβ` for every row of a design matrix.
    pub fn predict(&self, design: &DesignMatrix) -> Result<Vec<f64>> {
        if design.n_coefficients() != self.coefficients.len() {
            return Err(CasiError::DimensionMismatch {
                expected: self.coefficients.len(),
                actual: design.n_coefficients(),
            });
        }
        let beta = DVector::from_column_slice(&self.coefficients);
        Ok((design.matrix() * beta).iter().cloned().collect())
    }

    /// Turn a non-converged fit into an error.
    pub fn require_converged(self) -> Result<Self> {
        if self.converged {
            Ok(self)
        } else {
            Err(CasiError::Convergence {
                model: format!("quantile regression (tau = {})", self.tau),
                iterations: self.iterations,
            })
        }
    }
}

/// Check loss `ρ_τ(r)`.
pub fn check_loss(r: f64, tau: f64) -> f64 {
    if r < 0.0 {
        r * (tau - 1.0)
    } else {
        r * tau
    }
}

fn perturbed_objective(residuals: &DVector<f64>, tau: f64, epsilon: f64) -> f64 {
    residuals
        .iter()
        .map(|&r| check_loss(r, tau) - 0.5 * epsilon * (epsilon + r.abs()).ln())
        .sum()
}

/// Fit the `tau` conditional quantile of `y` on the design matrix.
///
/// A fit that exhausts `max_iter` is returned with `converged == false`;
/// callers that must not proceed use [`QuantileFit::require_converged`].
pub fn model_quantile(
    y: &DVector<f64>,
    design: &DesignMatrix,
    tau: f64,
    config: &QuantileConfig,
) -> Result<QuantileFit> {
    if !(tau > 0.0 && tau < 1.0) {
        return Err(CasiError::InvalidParameter(format!(
            "quantile level must lie in (0, 1), got {}",
            tau
        )));
    }
    if !(config.epsilon > 0.0) {
        return Err(CasiError::InvalidParameter(format!(
            "epsilon must be positive, got {}",
            config.epsilon
        )));
    }

    let n = y.len();
    let p = design.n_coefficients();
    if design.n_rows() != n {
        return Err(CasiError::DimensionMismatch {
            expected: n,
            actual: design.n_rows(),
        });
    }
    if n == 0 {
        return Err(CasiError::EmptyData(
            "quantile regression needs at least one row".to_string(),
        ));
    }

    let x = design.matrix();
    let xt = x.transpose();

    // OLS start
    let mut beta = xtx_inverse(x)? * (&xt * y);
    let mut residuals = y - x * &beta;
    let mut objective = perturbed_objective(&residuals, tau, config.epsilon);

    // (2τ − 1) Xᵀ1 does not change across iterations
    let shift = xt.column_sum() * (2.0 * tau - 1.0);

    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..config.max_iter {
        iterations = iter + 1;

        let w: Vec<f64> = residuals
            .iter()
            .map(|r| 1.0 / (config.epsilon + r.abs()))
            .collect();

        let mut xw = x.clone();
        for (i, wi) in w.iter().enumerate() {
            for j in 0..p {
                xw[(i, j)] *= wi;
            }
        }
        let xwt = xw.transpose();
        let xtwx: DMatrix<f64> = &xwt * x;
        let xtwy = &xwt * y + &shift;

        let beta_new = xtwx
            .cholesky()
            .map(|c| c.solve(&xtwy))
            .ok_or_else(|| {
                CasiError::Numerical(format!(
                    "weighted normal equations singular at iteration {} (tau = {})",
                    iterations, tau
                ))
            })?;

        let delta: f64 = (&beta_new - &beta).iter().map(|d| d.abs()).sum();
        let scale: f64 = beta.iter().map(|b| b.abs()).sum::<f64>().max(1.0);

        beta = beta_new;
        residuals = y - x * &beta;
        let objective_new = perturbed_objective(&residuals, tau, config.epsilon);
        let obj_change = (objective - objective_new).abs() / (objective.abs() + config.tol);
        objective = objective_new;

        if delta / scale < config.tol || obj_change < config.tol {
            converged = true;
            break;
        }
    }

    log::debug!(
        "quantile regression tau = {} finished after {} iterations (converged: {})",
        tau,
        iterations,
        converged
    );

    Ok(QuantileFit {
        tau,
        coefficient_names: design.coefficient_names().to_vec(),
        coefficients: beta.iter().cloned().collect(),
        objective: residuals.iter().map(|&r| check_loss(r, tau)).sum(),
        iterations,
        converged,
    })
}
