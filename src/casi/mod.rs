//! Compositional Aggregate Stability Index (CASI) derivation.
//!
//! Each sample's CLR coordinates are differenced against the reference
//! (untreated) condition of the same ssid, then auxiliary covariates are
//! joined on.

pub mod derive;
pub mod table;

pub use derive::{casi_index, derive_casi, join_covariates, select_references, CasiReport};
pub use table::{CasiRecord, CasiTable};
