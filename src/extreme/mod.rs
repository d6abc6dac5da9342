//! Extreme-value labelling from conditional quantile bounds.
//!
//! Two quantile regressions (by default τ = 0.05 and τ = 0.95) of CASI on
//! depth class, dispersion and the dispersion × sonication interaction give
//! a lower and an upper bound per sample. A sample is extreme when its CASI
//! falls strictly outside those bounds.

mod bounds;

pub use bounds::{label_extremes, ExtremeBounds, ExtremeLabel, PredictionScale};
