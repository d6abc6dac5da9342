//! Centered Log-Ratio (CLR) transformation of closed compositions.

use crate::compose::closure::close;
use crate::data::{Sample, SampleTable};
use crate::error::{CasiError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// CLR coordinates of a sand/silt/clay composition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClrTriple {
    pub csand: f64,
    pub csilt: f64,
    pub cclay: f64,
}

impl ClrTriple {
    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            csand: values[0],
            csilt: values[1],
            cclay: values[2],
        }
    }

    pub fn sum(&self) -> f64 {
        self.csand + self.csilt + self.cclay
    }
}

/// A measurement with its closed composition and CLR coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedSample {
    pub sample: Sample,
    /// Closed (sand, silt, clay) proportions.
    pub closed: [f64; 3],
    pub clr: ClrTriple,
}

/// Measurements that passed the dispersion filter, in input order.
#[derive(Debug, Clone)]
pub struct ComposedTable {
    pub rows: Vec<ComposedSample>,
    /// Rows removed by the dispersion filter.
    pub n_filtered: usize,
}

impl ComposedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Apply the CLR transformation to strictly positive parts.
///
/// # Formula
/// CLR(x_i) = log(x_i) - mean(log(x))
///
/// The mean of the logs equals the log of the geometric mean, so the
/// result is scale invariant and sums to zero.
pub fn clr(parts: &[f64]) -> Result<Vec<f64>> {
    if parts.is_empty() {
        return Err(CasiError::EmptyData(
            "cannot apply CLR to an empty composition".to_string(),
        ));
    }
    if let Some(bad) = parts.iter().find(|x| !(**x > 0.0) || !x.is_finite()) {
        return Err(CasiError::Numerical(format!(
            "CLR requires positive values; found {}",
            bad
        )));
    }

    let logs: Vec<f64> = parts.iter().map(|x| x.ln()).collect();
    let mean_log = logs.iter().sum::<f64>() / logs.len() as f64;
    Ok(logs.into_iter().map(|l| l - mean_log).collect())
}

/// Close and CLR-transform one measurement.
fn compose_sample(sample: &Sample) -> std::result::Result<ComposedSample, String> {
    let raw = sample.fractions();
    let names = ["sand", "silt", "clay"];

    let offending: Vec<String> = raw
        .iter()
        .zip(names.iter())
        .filter(|(x, _)| !(**x > 0.0) || !x.is_finite())
        .map(|(x, name)| format!("{}={}", name, x))
        .collect();
    if !offending.is_empty() {
        return Err(format!("{} ({})", sample.locator(), offending.join(", ")));
    }

    let closed = close(&raw).map_err(|e| format!("{} ({})", sample.locator(), e))?;
    let coords = clr(&closed).map_err(|e| format!("{} ({})", sample.locator(), e))?;

    Ok(ComposedSample {
        sample: sample.clone(),
        closed: [closed[0], closed[1], closed[2]],
        clr: ClrTriple::from_slice(&coords),
    })
}

/// Restrict to the analysed dispersion treatments, close and CLR-transform.
///
/// Every row with a zero or negative fraction is reported in a single
/// [`CasiError::NonPositiveFraction`]; no value is substituted.
pub fn compose(table: &SampleTable, dispersions: &[String]) -> Result<ComposedTable> {
    let kept: Vec<&Sample> = table
        .iter()
        .filter(|s| dispersions.iter().any(|d| d == &s.disp))
        .collect();
    let n_filtered = table.len() - kept.len();

    if kept.is_empty() {
        return Err(CasiError::EmptyData(format!(
            "no rows with dispersion in {:?}",
            dispersions
        )));
    }

    let results: Vec<std::result::Result<ComposedSample, String>> =
        kept.par_iter().map(|s| compose_sample(s)).collect();

    let mut rows = Vec::with_capacity(results.len());
    let mut offending = Vec::new();
    for result in results {
        match result {
            Ok(row) => rows.push(row),
            Err(msg) => offending.push(msg),
        }
    }
    if !offending.is_empty() {
        return Err(CasiError::NonPositiveFraction(offending));
    }

    log::info!(
        "Composed {} rows ({} outside dispersions {:?})",
        rows.len(),
        n_filtered,
        dispersions
    );

    Ok(ComposedTable { rows, n_filtered })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(ssid: &str, disp: &str, sand: f64, silt: f64, clay: f64) -> Sample {
        Sample {
            ssid: ssid.to_string(),
            site: "A".to_string(),
            pid: "P1".to_string(),
            disp: disp.to_string(),
            trt: "c4".to_string(),
            stime: 0.0,
            depth: 10.0,
            topsub: "topsoil".to_string(),
            sand,
            silt,
            clay,
            lat: 45.0,
            lon: -75.0,
        }
    }

    #[test]
    fn test_clr_manual_calculation() {
        // Simple case: 2 parts with geometric mean 2
        let result = clr(&[1.0, 4.0]).unwrap();
        assert_relative_eq!(result[0], -2.0_f64.ln(), epsilon = 1e-10);
        assert_relative_eq!(result[1], 2.0_f64.ln(), epsilon = 1e-10);
    }

    #[test]
    fn test_clr_40_40_20() {
        let closed = close(&[40.0, 40.0, 20.0]).unwrap();
        let result = clr(&closed).unwrap();

        let m = (0.4_f64.ln() + 0.4_f64.ln() + 0.2_f64.ln()) / 3.0;
        assert_relative_eq!(result[0], 0.4_f64.ln() - m, epsilon = 1e-12);
        assert_relative_eq!(result[1], 0.4_f64.ln() - m, epsilon = 1e-12);
        assert_relative_eq!(result[2], 0.2_f64.ln() - m, epsilon = 1e-12);
        assert_relative_eq!(result.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_clr_scale_invariant() {
        let a = clr(&[40.0, 40.0, 20.0]).unwrap();
        let b = clr(&[0.4, 0.4, 0.2]).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_clr_rejects_zero_and_negative() {
        assert!(clr(&[1.0, 0.0, 2.0]).is_err());
        assert!(clr(&[1.0, -1.0, 2.0]).is_err());
        assert!(clr(&[]).is_err());
    }

    #[test]
    fn test_compose_filters_dispersion() {
        let table = SampleTable::new(vec![
            sample("S1", "water", 40.0, 40.0, 20.0),
            sample("S1", "hexameta", 30.0, 50.0, 20.0),
            sample("S2", "calgon", 20.0, 50.0, 30.0),
        ]);
        let dispersions = vec!["water".to_string(), "calgon".to_string()];
        let composed = compose(&table, &dispersions).unwrap();

        assert_eq!(composed.len(), 2);
        assert_eq!(composed.n_filtered, 1);
        assert_eq!(composed.rows[0].sample.ssid, "S1");
        assert_eq!(composed.rows[1].sample.ssid, "S2");
        for row in &composed.rows {
            assert_relative_eq!(row.closed.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(row.clr.sum(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_compose_reports_every_offending_row() {
        let table = SampleTable::new(vec![
            sample("S1", "water", 40.0, 40.0, 20.0),
            sample("S2", "water", 60.0, 40.0, 0.0),
            sample("S3", "calgon", -1.0, 60.0, 41.0),
        ]);
        let dispersions = vec!["water".to_string(), "calgon".to_string()];
        let err = compose(&table, &dispersions).unwrap_err();

        match err {
            CasiError::NonPositiveFraction(rows) => {
                assert_eq!(rows.len(), 2);
                assert!(rows[0].contains("ssid=S2") && rows[0].contains("clay=0"));
                assert!(rows[1].contains("ssid=S3") && rows[1].contains("sand=-1"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_compose_nothing_left() {
        let table = SampleTable::new(vec![sample("S1", "air", 40.0, 40.0, 20.0)]);
        assert!(compose(&table, &["water".to_string()]).is_err());
    }
}
