//! Compositional Aggregate Stability Index (CASI) Library
//!
//! This library infers soil aggregate stability from laser-diffraction
//! particle-size (LDPSA) measurements taken under different dispersion
//! treatments and sonication times.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **fetch**: Download and extract the input archive
//! - **data**: Input tables, typed model specifications, design matrices
//! - **compose**: Closure and centered log-ratio transform
//! - **casi**: Reference selection, CASI derivation, covariate join
//! - **profile**: Distribution summaries and SVG figures
//! - **model**: Linear, quantile and linear mixed models
//! - **extreme**: Extreme-value labels from quantile bounds
//! - **test**: Wald tests for fixed effects
//! - **pipeline**: Workflow configuration and stage execution
//! - **report**: HTML report
//!
//! # Example
//!
//! ```no_run
//! use ldpsa_casi::prelude::*;
//!
//! let config = WorkflowConfig::from_file("casi.yaml").unwrap();
//! let output = run(&config).unwrap();
//! println!("{}", output.profile);
//! println!("{}", output.site_model);
//! ```

pub mod casi;
pub mod compose;
pub mod data;
pub mod error;
pub mod extreme;
pub mod fetch;
pub mod model;
pub mod pipeline;
pub mod profile;
pub mod report;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::casi::{derive_casi, join_covariates, CasiRecord, CasiReport, CasiTable};
    pub use crate::compose::{clr, close, compose, ClrTriple, ComposedTable};
    pub use crate::data::{
        CovariateTable, DesignMatrix, MixedModelSpec, ModelSpec, NestedRandomEffects, Predictor,
        RandomDesignMatrix, Sample, SampleTable, Term,
    };
    pub use crate::error::{CasiError, Result};
    pub use crate::extreme::{label_extremes, ExtremeBounds, ExtremeLabel, PredictionScale};
    pub use crate::fetch::{extract_archive, fetch_archive, ArchiveSource, FetchedArchive};
    pub use crate::model::{
        model_lm, model_lmm, model_quantile, LmFit, LmmConfig, LmmFit, QuantileConfig,
        QuantileFit, RandomIntercept, VarianceComponent,
    };
    pub use crate::pipeline::{
        derive_only, derive_table, fetch_data, fit_site_model, label_table, load_inputs,
        render_figures, run, SiteModel, WorkflowConfig, WorkflowOutput,
    };
    pub use crate::profile::{profile_casi, DistributionProfile, Summary};
    pub use crate::report::HtmlReport;
    pub use crate::test::{test_wald_lmm, CoefficientTest, FixedEffectTable};
}
