//! Linear model fitting via OLS.

use crate::data::DesignMatrix;
use crate::error::{CasiError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Results from fitting a linear model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmFit {
    /// Coefficient names from the design matrix.
    pub coefficient_names: Vec<String>,
    /// Estimated coefficients.
    pub coefficients: Vec<f64>,
    /// Standard errors of coefficients.
    pub std_errors: Vec<f64>,
    /// Residuals.
    #[serde(skip)]
    pub residuals: Vec<f64>,
    /// Residual standard error (sigma).
    pub sigma: f64,
    /// R-squared.
    pub r_squared: f64,
    /// Degrees of freedom (residual).
    pub df_residual: usize,
}

impl LmFit {
    /// Get coefficient index by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Get coefficient by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.coefficient_index(name)
            .and_then(|i| self.coefficients.get(i).copied())
    }
}

/// Fit an OLS regression of `y` on the design matrix.
pub fn model_lm(y: &DVector<f64>, design: &DesignMatrix) -> Result<LmFit> {
    let n = y.len();
    let p = design.n_coefficients();

    if design.n_rows() != n {
        return Err(CasiError::DimensionMismatch {
            expected: n,
            actual: design.n_rows(),
        });
    }

    let df_residual = n.saturating_sub(p);
    if df_residual == 0 {
        return Err(CasiError::Numerical(
            "Model is saturated (n_rows <= n_coefficients)".to_string(),
        ));
    }

    let x = design.matrix();
    let xtx_inv = xtx_inverse(x)?;

    // Coefficients: beta = (X'X)^-1 X'y
    let beta = &xtx_inv * (x.transpose() * y);
    let residuals_vec = y - x * &beta;
    let rss: f64 = residuals_vec.iter().map(|e| e * e).sum();
    let sigma = (rss / df_residual as f64).sqrt();

    let std_errors: Vec<f64> = (0..p)
        .map(|j| sigma * xtx_inv[(j, j)].max(0.0).sqrt())
        .collect();

    let y_mean = y.mean();
    let tss: f64 = y.iter().map(|yi| (yi - y_mean).powi(2)).sum();
    let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { 0.0 };

    Ok(LmFit {
        coefficient_names: design.coefficient_names().to_vec(),
        coefficients: beta.iter().cloned().collect(),
        std_errors,
        residuals: residuals_vec.iter().cloned().collect(),
        sigma,
        r_squared,
        df_residual,
    })
}

/// (X'X)^-1, failing on a rank-deficient design.
pub(crate) fn xtx_inverse(x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let xtx = x.transpose() * x;
    xtx.cholesky().map(|c| c.inverse()).ok_or_else(|| {
        CasiError::Numerical("Design matrix is singular (X'X not invertible)".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ColumnFrame, ModelSpec, Predictor};
    use approx::assert_relative_eq;

    fn create_test_frame() -> ColumnFrame {
        ColumnFrame::new()
            .with_categorical("disp", &["water", "calgon", "water", "calgon", "water", "calgon"])
            .with_numeric("stime", &[0.0, 0.0, 5.0, 5.0, 10.0, 10.0])
            .with_numeric("casi", &[1.0, 3.0, 1.2, 2.8, 0.9, 3.1])
    }

    #[test]
    fn test_model_lm_coefficients() {
        let frame = create_test_frame();
        let spec = ModelSpec::new("casi").main(Predictor::factor("disp"));
        let design = DesignMatrix::from_spec(&frame, &spec).unwrap();
        let y = DesignMatrix::response(&frame, &spec).unwrap();

        let fit = model_lm(&y, &design).unwrap();

        assert_eq!(fit.coefficient_names, vec!["(Intercept)", "dispwater"]);
        assert_relative_eq!(fit.coefficients[0], 2.966666666666667, epsilon = 1e-10);
        assert_relative_eq!(fit.coefficient("dispwater").unwrap(), 1.0333333333333334 - 2.966666666666667, epsilon = 1e-10);
        assert!(fit.r_squared > 0.95);
        assert_eq!(fit.df_residual, 4);
    }

    #[test]
    fn test_exact_line() {
        let frame = ColumnFrame::new()
            .with_numeric("x", &[0.0, 1.0, 2.0, 3.0])
            .with_numeric("y", &[2.0, 5.0, 8.0, 11.0]);
        let spec = ModelSpec::new("y").main(Predictor::numeric("x"));
        let design = DesignMatrix::from_spec(&frame, &spec).unwrap();
        let y = DesignMatrix::response(&frame, &spec).unwrap();

        let fit = model_lm(&y, &design).unwrap();
        assert_relative_eq!(fit.coefficients[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(fit.coefficients[1], 3.0, epsilon = 1e-10);
        assert_relative_eq!(fit.sigma, 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_dimension_mismatch() {
        let frame = create_test_frame();
        let spec = ModelSpec::new("casi").main(Predictor::factor("disp"));
        let design = DesignMatrix::from_spec(&frame, &spec).unwrap();
        let y = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert!(model_lm(&y, &design).is_err());
    }

    #[test]
    fn test_singular_design() {
        let frame = ColumnFrame::new()
            .with_numeric("x", &[1.0, 1.0, 1.0, 1.0])
            .with_numeric("y", &[2.0, 5.0, 8.0, 11.0]);
        let spec = ModelSpec::new("y").main(Predictor::numeric("x"));
        let design = DesignMatrix::from_spec(&frame, &spec).unwrap();
        let y = DesignMatrix::response(&frame, &spec).unwrap();
        assert!(model_lm(&y, &design).is_err());
    }
}
