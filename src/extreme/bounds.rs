//! Quantile bounds and y/n labels.

use crate::casi::CasiTable;
use crate::data::{DesignMatrix, ModelSpec};
use crate::error::{CasiError, Result};
use crate::model::{model_quantile, QuantileConfig, QuantileFit};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Scale on which quantile predictions are compared with CASI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionScale {
    /// `exp(Xβ)`; CASI itself is not log-scale, so bounds are always positive.
    #[default]
    Exponentiated,
    /// The linear predictor `Xβ`, on the CASI scale.
    Linear,
}

impl PredictionScale {
    pub fn apply(self, eta: f64) -> f64 {
        match self {
            PredictionScale::Exponentiated => eta.exp(),
            PredictionScale::Linear => eta,
        }
    }
}

/// Extreme-value label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtremeLabel {
    #[serde(rename = "y")]
    Extreme,
    #[serde(rename = "n")]
    Typical,
}

impl ExtremeLabel {
    /// `Extreme` iff `value < lo` or `value > hi`; boundary values are typical.
    pub fn classify(value: f64, lo: f64, hi: f64) -> Self {
        if value < lo || value > hi {
            ExtremeLabel::Extreme
        } else {
            ExtremeLabel::Typical
        }
    }

    pub fn is_extreme(self) -> bool {
        self == ExtremeLabel::Extreme
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtremeLabel::Extreme => "y",
            ExtremeLabel::Typical => "n",
        }
    }
}

impl std::fmt::Display for ExtremeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-row bounds and labels, aligned with the input table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtremeBounds {
    /// Model the bounds were fitted with.
    pub model: String,
    pub scale: PredictionScale,
    /// Lower-quantile fit.
    pub lower: QuantileFit,
    /// Upper-quantile fit.
    pub upper: QuantileFit,
    #[serde(skip)]
    pub lo: Vec<f64>,
    #[serde(skip)]
    pub hi: Vec<f64>,
    #[serde(skip)]
    pub labels: Vec<ExtremeLabel>,
}

impl ExtremeBounds {
    /// Number of rows labelled extreme.
    pub fn n_extreme(&self) -> usize {
        self.labels.iter().filter(|l| l.is_extreme()).count()
    }

    /// Whether row `i` is extreme.
    pub fn is_extreme(&self, i: usize) -> bool {
        self.labels.get(i).map_or(false, |l| l.is_extreme())
    }
}

/// Fit the lower and upper quantile regressions and label every row.
///
/// Both fits must converge; a non-converged fit is a
/// [`CasiError::Convergence`].
pub fn label_extremes(
    table: &CasiTable,
    spec: &ModelSpec,
    quantiles: (f64, f64),
    scale: PredictionScale,
    config: &QuantileConfig,
) -> Result<ExtremeBounds> {
    let (tau_lo, tau_hi) = quantiles;
    if !(tau_lo < tau_hi) {
        return Err(CasiError::InvalidParameter(format!(
            "lower quantile {} must be below upper quantile {}",
            tau_lo, tau_hi
        )));
    }
    if table.is_empty() {
        return Err(CasiError::EmptyData(
            "no rows to fit quantile bounds on".to_string(),
        ));
    }

    let design = DesignMatrix::from_spec(table, spec)?;
    let y = DesignMatrix::response(table, spec)?;

    let mut fits = [tau_lo, tau_hi]
        .par_iter()
        .map(|&tau| model_quantile(&y, &design, tau, config)?.require_converged())
        .collect::<Result<Vec<QuantileFit>>>()?;
    let upper = fits.pop().ok_or_else(|| {
        CasiError::Numerical("upper quantile fit missing".to_string())
    })?;
    let lower = fits.pop().ok_or_else(|| {
        CasiError::Numerical("lower quantile fit missing".to_string())
    })?;

    if scale == PredictionScale::Exponentiated {
        log::warn!(
            "Quantile predictions are exponentiated before comparison with CASI; \
             negative CASI values always fall below the lower bound"
        );
    }

    let lo: Vec<f64> = lower
        .predict(&design)?
        .into_iter()
        .map(|eta| scale.apply(eta))
        .collect();
    let hi: Vec<f64> = upper
        .predict(&design)?
        .into_iter()
        .map(|eta| scale.apply(eta))
        .collect();

    let labels: Vec<ExtremeLabel> = table
        .iter()
        .zip(lo.iter().zip(&hi))
        .map(|(r, (&l, &h))| ExtremeLabel::classify(r.casi, l, h))
        .collect();

    let bounds = ExtremeBounds {
        model: spec.to_string(),
        scale,
        lower,
        upper,
        lo,
        hi,
        labels,
    };

    log::info!(
        "Labelled {} of {} rows extreme ({} with tau = {}/{})",
        bounds.n_extreme(),
        table.len(),
        bounds.model,
        tau_lo,
        tau_hi
    );

    Ok(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casi::CasiRecord;
    use crate::compose::ClrTriple;
    use crate::data::Sample;

    fn record(ssid: usize, disp: &str, stime: f64, casi: f64) -> CasiRecord {
        let clr = ClrTriple { csand: 0.0, csilt: 0.0, cclay: 0.0 };
        CasiRecord {
            sample: Sample {
                ssid: format!("S{}", ssid),
                site: "A".to_string(),
                pid: "P1".to_string(),
                disp: disp.to_string(),
                trt: "w1".to_string(),
                stime,
                depth: 10.0,
                topsub: if ssid % 2 == 0 { "topsoil" } else { "subsoil" }.to_string(),
                sand: 40.0,
                silt: 40.0,
                clay: 20.0,
                lat: 45.0,
                lon: -75.0,
            },
            closed: [0.4, 0.4, 0.2],
            clr,
            reference: clr,
            casi,
            covariates: Vec::new(),
        }
    }

    fn grid_table() -> CasiTable {
        CasiTable::new(
            (0..=100).map(|i| record(i, "water", 5.0, i as f64)).collect(),
            Vec::new(),
        )
    }

    #[test]
    fn test_classify_is_strict() {
        assert_eq!(ExtremeLabel::classify(1.0, 1.0, 2.0), ExtremeLabel::Typical);
        assert_eq!(ExtremeLabel::classify(2.0, 1.0, 2.0), ExtremeLabel::Typical);
        assert_eq!(ExtremeLabel::classify(0.999, 1.0, 2.0), ExtremeLabel::Extreme);
        assert_eq!(ExtremeLabel::classify(2.001, 1.0, 2.0), ExtremeLabel::Extreme);
        assert_eq!(ExtremeLabel::Extreme.to_string(), "y");
        assert_eq!(ExtremeLabel::Typical.to_string(), "n");
    }

    #[test]
    fn test_prediction_scale() {
        assert_eq!(PredictionScale::Linear.apply(-1.5), -1.5);
        assert!((PredictionScale::Exponentiated.apply(0.0) - 1.0).abs() < 1e-12);
        assert_eq!(PredictionScale::default(), PredictionScale::Exponentiated);
    }

    #[test]
    fn test_intercept_only_bounds_linear() {
        let table = grid_table();
        let bounds = label_extremes(
            &table,
            &ModelSpec::new("casi"),
            (0.05, 0.95),
            PredictionScale::Linear,
            &QuantileConfig::default(),
        )
        .unwrap();

        assert!((bounds.lo[0] - 5.0).abs() < 1e-3);
        assert!((bounds.hi[0] - 95.0).abs() < 1e-3);
        for (i, label) in bounds.labels.iter().enumerate() {
            if i < 5 || i > 95 {
                assert!(label.is_extreme(), "row {} should be extreme", i);
            } else if i > 5 && i < 95 {
                assert!(!label.is_extreme(), "row {} should be typical", i);
            }
        }
        assert!(bounds.n_extreme() >= 10 && bounds.n_extreme() <= 12);
    }

    #[test]
    fn test_exponentiated_bounds() {
        let table = grid_table();
        let bounds = label_extremes(
            &table,
            &ModelSpec::new("casi"),
            (0.05, 0.95),
            PredictionScale::Exponentiated,
            &QuantileConfig::default(),
        )
        .unwrap();

        // exp(5) ≈ 148 and exp(95) is huge, so only rows below exp(5) are flagged
        assert!((bounds.lo[0] - 5.0_f64.exp()).abs() / 5.0_f64.exp() < 1e-2);
        assert!(bounds.labels.iter().all(|l| l.is_extreme()));
    }

    #[test]
    fn test_rejects_inverted_quantiles() {
        let table = grid_table();
        let result = label_extremes(
            &table,
            &ModelSpec::new("casi"),
            (0.95, 0.05),
            PredictionScale::Linear,
            &QuantileConfig::default(),
        );
        assert!(result.is_err());
    }
}
