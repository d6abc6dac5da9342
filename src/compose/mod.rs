//! Compositional transforms for sand/silt/clay fractions.
//!
//! - **Closure**: rescale parts to sum to 1
//! - **CLR**: centered log-ratio coordinates (sum to 0)

pub mod closure;
pub mod clr;

pub use closure::close;
pub use clr::{clr, compose, ClrTriple, ComposedSample, ComposedTable};
