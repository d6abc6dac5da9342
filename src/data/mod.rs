//! Data structures for the CASI workflow.

mod covariates;
mod design_matrix;
mod model_spec;
mod random_effects;
mod sample;
mod variable;

pub use covariates::CovariateTable;
pub use design_matrix::{ColumnFrame, DesignMatrix};
pub use model_spec::{Coding, MixedModelSpec, ModelSpec, NestedRandomEffects, Predictor, Term};
pub use random_effects::{GroupingLevel, RandomDesignMatrix};
pub use sample::{Sample, SampleTable, REQUIRED_COLUMNS};
pub use variable::{format_number, Columns, Variable, VariableType};
