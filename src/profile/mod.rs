//! Distribution profiling of the CASI table: grouped summaries and figures.

mod distribution;
pub mod figures;

pub use distribution::{
    profile_casi, quantile_type7, BoxStats, DistributionProfile, GroupSummary, Summary,
};
pub use figures::{casi_boxplot, coefficient_plot, site_map, ternary, ternary_xy, TernaryColour};
