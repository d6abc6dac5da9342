//! Statistical models for the CASI workflow.

pub mod lm;
pub mod lmm;
pub mod quantile;

pub use lm::{model_lm, LmFit};
pub use lmm::{model_lmm, LmmConfig, LmmFit, RandomIntercept, VarianceComponent};
pub use quantile::{check_loss, model_quantile, QuantileConfig, QuantileFit};
