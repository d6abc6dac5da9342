//! Closure of a composition to the unit simplex.

use crate::error::{CasiError, Result};

/// Divide each part by the total so the parts sum to 1.
///
/// Parts must be finite and non-negative with a positive total.
pub fn close(parts: &[f64]) -> Result<Vec<f64>> {
    if parts.is_empty() {
        return Err(CasiError::EmptyData(
            "cannot close an empty composition".to_string(),
        ));
    }
    if let Some(bad) = parts.iter().find(|x| !x.is_finite() || **x < 0.0) {
        return Err(CasiError::Numerical(format!(
            "closure requires finite non-negative parts; found {}",
            bad
        )));
    }

    let total: f64 = parts.iter().sum();
    if total <= 0.0 {
        return Err(CasiError::Numerical(
            "closure requires a positive total".to_string(),
        ));
    }

    Ok(parts.iter().map(|x| x / total).collect())
}
