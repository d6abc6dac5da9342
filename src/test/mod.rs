//! Statistical hypothesis testing for fixed effects.


pub use wald::{significance_code, test_wald_lmm, CoefficientTest, FixedEffectTable};
