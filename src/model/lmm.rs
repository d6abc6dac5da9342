//! Linear mixed models with nested random intercepts.
//!
//! `y = Xβ + Σ_k Z_k u_k + ε` with `u_k ~ N(0, τ_k² I)` and `ε ~ N(0, σ² I)`,
//! one `u_k` block per grouping level (site, profile within site).
//!
//! Estimation is REML. Each iteration solves Henderson's mixed model
//! equations
//!
//! ```text
//! | X'X   X'Z       | |β|   |X'y|
//! | Z'X   Z'Z + Λ   | |u| = |Z'y|,   Λ = diag(σ²/τ_k²)
//! ```
//!
//! and updates the variance components by EM:
//! `σ² = (y'y − sol'rhs) / (n − p)` and
//! `τ_k² = (u_k'u_k + σ² tr(C⁻¹_kk)) / q_k`.
//!
//! # Example
//! ```ignore
//! use ldpsa_casi::data::{DesignMatrix, MixedModelSpec, RandomDesignMatrix};
//! use ldpsa_casi::model::{model_lmm, LmmConfig};
//!
//! let spec = MixedModelSpec::site_model();
//! let design = DesignMatrix::from_spec(&table, &spec.fixed)?;
//! let random = RandomDesignMatrix::from_nested(&table, &spec.random)?;
//! let y = DesignMatrix::response(&table, &spec.fixed)?;
//! let fit = model_lmm(&y, &design, &random, &LmmConfig::default())?.require_converged()?;
//! ```

use crate::data::{DesignMatrix, RandomDesignMatrix};
use crate::error::{CasiError, Result};
use crate::model::lm::model_lm;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Configuration for LMM fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmmConfig {
    /// Maximum EM iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the REML log-likelihood.
    pub tol: f64,
    /// Lower bound for variance components (prevents collapse to zero).
    pub var_lower_bound: f64,
}

impl Default for LmmConfig {
    fn default() -> Self {
        Self {
            max_iter: 5000,
            tol: 1e-7,
            var_lower_bound: 1e-10,
        }
    }
}

/// Variance of the random intercepts at one grouping level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceComponent {
    /// Grouping level (`site`, `site:pid`).
    pub group: String,
    /// Number of groups at this level.
    pub n_groups: usize,
    /// Estimated variance τ².
    pub variance: f64,
}

/// Predicted random intercept of one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomIntercept {
    /// Grouping level the group belongs to.
    pub level: String,
    /// Group key, e.g. `S01` or `S01:P2`.
    pub group: String,
    /// Conditional mode (BLUP).
    pub estimate: f64,
    /// Conditional standard error given the fixed effects.
    pub std_error: f64,
}

/// Results from fitting a mixed model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmmFit {
    /// Fixed effect coefficient names.
    pub coefficient_names: Vec<String>,
    /// Estimated fixed effects.
    pub coefficients: Vec<f64>,
    /// Standard errors of fixed effects.
    pub std_errors: Vec<f64>,
    /// Residual degrees of freedom (n − p).
    pub df_residual: usize,
    /// Random intercept variances, outermost level first.
    pub variance_components: Vec<VarianceComponent>,
    /// Residual variance σ².
    pub residual_variance: f64,
    /// Random intercepts for every group at every level.
    pub random_effects: Vec<RandomIntercept>,
    /// REML log-likelihood at the final estimates.
    pub log_reml: f64,
    /// Number of observations.
    pub n_obs: usize,
    /// Number of iterations.
    pub iterations: usize,
    /// Whether the model converged.
    pub converged: bool,
}

impl LmmFit {
    /// Get coefficient index by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Get coefficient by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.coefficient_index(name)
            .and_then(|i| self.coefficients.get(i).copied())
    }

    /// Random intercepts of one grouping level.
    pub fn random_effects_for(&self, level: &str) -> Vec<&RandomIntercept> {
        self.random_effects
            .iter()
            .filter(|r| r.level == level)
            .collect()
    }

    /// REML criterion, `−2 log L_R`.
    pub fn reml_criterion(&self) -> f64 {
        -2.0 * self.log_reml
    }

    /// Turn a non-converged fit into an error.
    pub fn require_converged(self) -> Result<Self> {
        if self.converged {
            Ok(self)
        } else {
            Err(CasiError::Convergence {
                model: "linear mixed model".to_string(),
                iterations: self.iterations,
            })
        }
    }
}

/// Solution of the mixed model equations at fixed variance components.
struct MmeSolution {
    beta: DVector<f64>,
    u: DVector<f64>,
    c_inv: DMatrix<f64>,
    /// y'y − sol'rhs, the REML residual quadratic form times σ².
    ssr: f64,
    log_det_c: f64,
}

/// Cross products shared by every iteration.
struct CrossProducts {
    xtx: DMatrix<f64>,
    xtz: DMatrix<f64>,
    ztz: DMatrix<f64>,
    xty: DVector<f64>,
    zty: DVector<f64>,
    yty: f64,
}

fn solve_mme(
    cp: &CrossProducts,
    ranges: &[std::ops::Range<usize>],
    sigma2: f64,
    tau2: &[f64],
) -> Result<MmeSolution> {
    let p = cp.xtx.nrows();
    let q = cp.ztz.nrows();

    let mut c = DMatrix::<f64>::zeros(p + q, p + q);
    c.view_mut((0, 0), (p, p)).copy_from(&cp.xtx);
    c.view_mut((0, p), (p, q)).copy_from(&cp.xtz);
    c.view_mut((p, 0), (q, p)).copy_from(&cp.xtz.transpose());
    c.view_mut((p, p), (q, q)).copy_from(&cp.ztz);
    for (range, t2) in ranges.iter().zip(tau2) {
        let lambda = sigma2 / t2;
        for i in range.clone() {
            c[(p + i, p + i)] += lambda;
        }
    }

    let mut rhs = DVector::<f64>::zeros(p + q);
    rhs.rows_mut(0, p).copy_from(&cp.xty);
    rhs.rows_mut(p, q).copy_from(&cp.zty);

    let chol = c.cholesky().ok_or_else(|| {
        CasiError::Numerical("mixed model equations are not positive definite".to_string())
    })?;
    let log_det_c = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
    let sol = chol.solve(&rhs);
    let c_inv = chol.inverse();

    Ok(MmeSolution {
        beta: sol.rows(0, p).into_owned(),
        u: sol.rows(p, q).into_owned(),
        c_inv,
        ssr: cp.yty - sol.dot(&rhs),
        log_det_c,
    })
}

/// REML log-likelihood at the current variance components.
fn log_reml(
    sol: &MmeSolution,
    n: usize,
    p: usize,
    ranges: &[std::ops::Range<usize>],
    sigma2: f64,
    tau2: &[f64],
) -> f64 {
    let df = (n - p) as f64;
    let log_ratio: f64 = ranges
        .iter()
        .zip(tau2)
        .map(|(r, t2)| r.len() as f64 * (t2 / sigma2).ln())
        .sum();
    let m2ll = df * (2.0 * std::f64::consts::PI * sigma2).ln()
        + log_ratio
        + sol.log_det_c
        + sol.ssr / sigma2;
    -0.5 * m2ll
}

/// Fit a linear mixed model with nested random intercepts by REML.
///
/// A fit that exhausts `max_iter` is returned with `converged == false`;
/// callers that must not proceed use [`LmmFit::require_converged`].
pub fn model_lmm(
    y: &DVector<f64>,
    design: &DesignMatrix,
    random_design: &RandomDesignMatrix,
    config: &LmmConfig,
) -> Result<LmmFit> {
    let n = y.len();
    let p = design.n_coefficients();

    // Validate dimensions
    if design.n_rows() != n {
        return Err(CasiError::DimensionMismatch {
            expected: n,
            actual: design.n_rows(),
        });
    }
    if random_design.n_rows() != n {
        return Err(CasiError::DimensionMismatch {
            expected: n,
            actual: random_design.n_rows(),
        });
    }
    if n <= p {
        return Err(CasiError::Numerical(
            "Model is saturated (n_rows <= n_fixed_effects)".to_string(),
        ));
    }

    let x = design.matrix();
    let z = random_design.matrix();
    let ranges: Vec<_> = (0..random_design.levels.len())
        .map(|k| random_design.level_range(k))
        .collect();
    let n_levels = ranges.len();

    let cp = CrossProducts {
        xtx: x.transpose() * x,
        xtz: x.transpose() * z,
        ztz: z.transpose() * z,
        xty: x.transpose() * y,
        zty: z.transpose() * y,
        yty: y.dot(y),
    };

    // Initialize variance components from OLS residuals
    let ols = model_lm(y, design)?;
    let s2 = (ols.sigma * ols.sigma).max(config.var_lower_bound);
    let mut sigma2 = (0.5 * s2).max(config.var_lower_bound);
    let mut tau2 = vec![(0.5 * s2 / n_levels as f64).max(config.var_lower_bound); n_levels];

    let mut log_reml_prev = f64::NEG_INFINITY;
    let mut converged = false;
    let mut iterations = 0;

    let mut sol = solve_mme(&cp, &ranges, sigma2, &tau2)?;
    let mut ll = log_reml(&sol, n, p, &ranges, sigma2, &tau2);

    for iter in 0..config.max_iter {
        iterations = iter + 1;

        if (ll - log_reml_prev).abs() < config.tol {
            converged = true;
            break;
        }
        log_reml_prev = ll;

        // EM updates
        let new_sigma2 = (sol.ssr / (n - p) as f64).max(config.var_lower_bound);
        let new_tau2: Vec<f64> = ranges
            .iter()
            .map(|range| {
                let uk = sol.u.rows(range.start, range.len());
                let trace: f64 = range.clone().map(|i| sol.c_inv[(p + i, p + i)]).sum();
                ((uk.dot(&uk) + sigma2 * trace) / range.len() as f64)
                    .max(config.var_lower_bound)
            })
            .collect();

        sigma2 = new_sigma2;
        tau2 = new_tau2;
        sol = solve_mme(&cp, &ranges, sigma2, &tau2)?;
        ll = log_reml(&sol, n, p, &ranges, sigma2, &tau2);

        log::debug!(
            "LMM iteration {}: logLik(REML) = {:.6}, sigma2 = {:.6}, tau2 = {:?}",
            iterations,
            ll,
            sigma2,
            tau2
        );
    }

    let std_errors: Vec<f64> = (0..p)
        .map(|j| (sigma2 * sol.c_inv[(j, j)]).max(0.0).sqrt())
        .collect();

    // Conditional variances of u given β: σ² (Z'Z + Λ)⁻¹
    let mut ztz_lambda = cp.ztz.clone();
    for (range, t2) in ranges.iter().zip(&tau2) {
        for i in range.clone() {
            ztz_lambda[(i, i)] += sigma2 / t2;
        }
    }
    let cond_var = ztz_lambda.cholesky().map(|c| c.inverse()).ok_or_else(|| {
        CasiError::Numerical("random effect block is not positive definite".to_string())
    })?;

    let mut random_effects = Vec::with_capacity(random_design.n_random_effects());
    for (level, range) in random_design.levels.iter().zip(&ranges) {
        for (g, group) in level.group_ids.iter().enumerate() {
            let i = range.start + g;
            random_effects.push(RandomIntercept {
                level: level.name.clone(),
                group: group.clone(),
                estimate: sol.u[i],
                std_error: (sigma2 * cond_var[(i, i)]).max(0.0).sqrt(),
            });
        }
    }

    let variance_components = random_design
        .levels
        .iter()
        .zip(&tau2)
        .map(|(level, &variance)| VarianceComponent {
            group: level.name.clone(),
            n_groups: level.n_groups(),
            variance,
        })
        .collect();

    if converged {
        log::info!(
            "LMM converged after {} iterations (REML criterion {:.4})",
            iterations,
            -2.0 * ll
        );
    } else {
        log::warn!("LMM did not converge after {} iterations", iterations);
    }

    Ok(LmmFit {
        coefficient_names: design.coefficient_names().to_vec(),
        coefficients: sol.beta.iter().cloned().collect(),
        std_errors,
        df_residual: n - p,
        variance_components,
        residual_variance: sigma2,
        random_effects,
        log_reml: ll,
        n_obs: n,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ColumnFrame, ModelSpec, NestedRandomEffects, Predictor};
    use approx::assert_relative_eq;

    /// Balanced two-level data: 6 sites × 3 profiles × 4 depths.
    ///
    /// `y = 2 + 0.5 x + site + profile + e`, where the effects sum to zero
    /// and `e` is orthogonal to `x` inside every profile.
    fn balanced_frame() -> ColumnFrame {
        let site_effects = [-1.2, -0.6, 0.0, 0.4, 0.5, 0.9];
        let profile_effects = [0.3, -0.1, -0.2];
        let noise = [0.1, -0.1, -0.1, 0.1];

        let mut site = Vec::new();
        let mut pid = Vec::new();
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (s, se) in site_effects.iter().enumerate() {
            for (p, pe) in profile_effects.iter().enumerate() {
                let scale = 1.0 + s as f64 * 0.2;
                for (j, e) in noise.iter().enumerate() {
                    site.push(format!("S{}", s + 1));
                    pid.push(format!("P{}", p + 1));
                    x.push(j as f64);
                    y.push(2.0 + 0.5 * j as f64 + se + pe * scale + e * (1.0 + p as f64));
                }
            }
        }
        let site_refs: Vec<&str> = site.iter().map(|s| s.as_str()).collect();
        let pid_refs: Vec<&str> = pid.iter().map(|s| s.as_str()).collect();
        ColumnFrame::new()
            .with_categorical("site", &site_refs)
            .with_categorical("pid", &pid_refs)
            .with_numeric("x", &x)
            .with_numeric("y", &y)
    }

    fn fit_balanced() -> LmmFit {
        let frame = balanced_frame();
        let spec = ModelSpec::new("y").main(Predictor::numeric("x"));
        let design = DesignMatrix::from_spec(&frame, &spec).unwrap();
        let random =
            RandomDesignMatrix::from_nested(&frame, &NestedRandomEffects::new(&["site", "pid"]))
                .unwrap();
        let y = DesignMatrix::response(&frame, &spec).unwrap();
        model_lmm(&y, &design, &random, &LmmConfig::default()).unwrap()
    }

    #[test]
    fn test_recovers_intercept_and_slope() {
        let fit = fit_balanced();
        assert!(fit.converged);
        assert_relative_eq!(fit.coefficient("(Intercept)").unwrap(), 2.0, epsilon = 1e-6);
        assert_relative_eq!(fit.coefficient("x").unwrap(), 0.5, epsilon = 1e-6);
        assert_eq!(fit.df_residual, 70);
        assert!(fit.std_errors.iter().all(|se| *se > 0.0));
    }

    #[test]
    fn test_variance_components_and_effects() {
        let fit = fit_balanced();

        assert_eq!(fit.variance_components.len(), 2);
        assert_eq!(fit.variance_components[0].group, "site");
        assert_eq!(fit.variance_components[0].n_groups, 6);
        assert_eq!(fit.variance_components[1].group, "site:pid");
        assert_eq!(fit.variance_components[1].n_groups, 18);
        assert!(fit.variance_components[0].variance > fit.residual_variance);

        let sites = fit.random_effects_for("site");
        assert_eq!(sites.len(), 6);
        assert_eq!(sites[0].group, "S1");
        // Shrunken towards zero but ordered like the simulated effects
        assert!(sites[0].estimate < sites[1].estimate);
        assert!(sites[4].estimate < sites[5].estimate);
        assert!(sites[0].estimate < 0.0 && sites[5].estimate > 0.0);
        assert!(sites.iter().all(|s| s.std_error > 0.0));

        let profiles = fit.random_effects_for("site:pid");
        assert_eq!(profiles.len(), 18);
        assert_eq!(profiles[0].group, "S1:P1");
    }

    #[test]
    fn test_require_converged() {
        let frame = balanced_frame();
        let spec = ModelSpec::new("y").main(Predictor::numeric("x"));
        let design = DesignMatrix::from_spec(&frame, &spec).unwrap();
        let random =
            RandomDesignMatrix::from_nested(&frame, &NestedRandomEffects::new(&["site", "pid"]))
                .unwrap();
        let y = DesignMatrix::response(&frame, &spec).unwrap();
        let config = LmmConfig {
            max_iter: 2,
            tol: 0.0,
            ..Default::default()
        };
        let fit = model_lmm(&y, &design, &random, &config).unwrap();
        assert!(!fit.converged);
        assert!(matches!(
            fit.require_converged(),
            Err(CasiError::Convergence { iterations: 2, .. })
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let frame = balanced_frame();
        let spec = ModelSpec::new("y").main(Predictor::numeric("x"));
        let design = DesignMatrix::from_spec(&frame, &spec).unwrap();
        let random =
            RandomDesignMatrix::from_nested(&frame, &NestedRandomEffects::new(&["site"])).unwrap();
        let y = DVector::from_vec(vec![1.0; 10]);
        assert!(model_lmm(&y, &design, &random, &LmmConfig::default()).is_err());
    }
}
