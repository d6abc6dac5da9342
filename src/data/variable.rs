//! Column values and the column-access trait used to build model matrices.

use crate::error::{CasiError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single cell value that can be categorical or continuous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical variable with a string level.
    Categorical(String),
    /// Continuous numeric variable.
    Continuous(f64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Render the value as a factor level label.
    ///
    /// Continuous values print without a trailing `.0` so that a sonication
    /// time of `5.0` becomes level `5`.
    pub fn level_label(&self) -> Option<String> {
        match self {
            Variable::Categorical(s) => Some(s.clone()),
            Variable::Continuous(x) => Some(format_number(*x)),
            Variable::Missing => None,
        }
    }
}

/// Format a number the way factor levels print (`5`, `2.5`).
pub fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

/// Type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
}

/// Tabular data addressable by column name.
///
/// Implemented by the tables that feed the model matrices so that design
/// construction does not depend on a concrete row type.
pub trait Columns {
    /// Number of rows.
    fn n_rows(&self) -> usize;

    /// Values of a named column, one per row.
    fn column(&self, name: &str) -> Result<Vec<Variable>>;

    /// Row labels used to name matrix rows.
    fn row_ids(&self) -> Vec<String>;

    /// Type of a column, inferred from its values.
    fn column_type(&self, name: &str) -> Result<VariableType> {
        let values = self.column(name)?;
        let any_categorical = values
            .iter()
            .any(|v| matches!(v, Variable::Categorical(_)));
        Ok(if any_categorical {
            VariableType::Categorical
        } else {
            VariableType::Continuous
        })
    }

    /// Continuous values of a column; missing or categorical cells are an error.
    fn numeric_column(&self, name: &str) -> Result<Vec<f64>> {
        self.column(name)?
            .iter()
            .enumerate()
            .map(|(row, v)| match v {
                Variable::Continuous(x) => Ok(*x),
                other => Err(CasiError::InvalidValue {
                    value: format!("{:?}", other),
                    row,
                    column: name.to_string(),
                }),
            })
            .collect()
    }

    /// Sorted unique levels of a column treated as a factor.
    ///
    /// Categorical levels sort alphabetically; numeric levels sort by value.
    fn levels(&self, name: &str) -> Result<Vec<String>> {
        let values = self.column(name)?;
        let mut present: Vec<&Variable> = values.iter().filter(|v| !v.is_missing()).collect();
        present.sort_by(|a, b| match (a, b) {
            (Variable::Continuous(x), Variable::Continuous(y)) => {
                x.partial_cmp(y).unwrap_or(Ordering::Equal)
            }
            _ => a.level_label().cmp(&b.level_label()),
        });
        let mut levels: Vec<String> = present.iter().filter_map(|v| v.level_label()).collect();
        levels.dedup();
        Ok(levels)
    }
}
