//! Workflow configuration, stage orchestration and artifact output.

mod config;
mod output;
mod workflow;

pub use config::WorkflowConfig;
pub use output::{write_casi_csv, write_casi_table, write_json, CASI_TABLE_COLUMNS};
pub use workflow::{
    boxplot_subset, derive_only, derive_table, fetch_data, fit_site_model, label_table, load_inputs,
    render_figures, run, Inputs, SiteModel, WorkflowOutput, CASI_TABLE_FILE,
    EXTREME_BOUNDS_FILE, PROFILE_FILE, REPORT_FILE, SITE_MODEL_FILE,
};
