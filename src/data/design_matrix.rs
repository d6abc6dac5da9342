//! Design matrix construction from a column source and a typed model spec.

use crate::data::{Columns, ModelSpec, Predictor, Term, Variable};
use crate::error::{CasiError, Result};
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;

/// A design matrix for linear modeling.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (rows × coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Row identifiers.
    row_ids: Vec<String>,
    /// Reference levels for factor predictors.
    reference_levels: HashMap<String, String>,
}

/// Named columns produced by one predictor.
type TermColumns = Vec<(String, Vec<f64>)>;

impl DesignMatrix {
    /// Build a design matrix from a column source and a model spec.
    ///
    /// Factors use treatment coding against their first sorted level. A
    /// factor interacting with a numeric predictor whose main effect is
    /// absent gets one column per level, so `disp + disp:stime` yields a
    /// separate sonication slope for each dispersion treatment.
    pub fn from_spec<C: Columns + ?Sized>(source: &C, spec: &ModelSpec) -> Result<Self> {
        let row_ids = source.row_ids();
        let n_rows = source.n_rows();

        // Determine reference levels for factors (first sorted level)
        let mut reference_levels = HashMap::new();
        for term in &spec.terms {
            let predictors: Vec<&Predictor> = match term {
                Term::Main(p) => vec![p],
                Term::Interaction(a, b) => vec![a, b],
            };
            for p in predictors.into_iter().filter(|p| p.is_factor()) {
                if reference_levels.contains_key(&p.name) {
                    continue;
                }
                let levels = source.levels(&p.name)?;
                let first = levels.first().ok_or_else(|| {
                    CasiError::EmptyData(format!("factor '{}' has no levels", p.name))
                })?;
                reference_levels.insert(p.name.clone(), first.clone());
            }
        }

        let mut coefficient_names = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();

        if spec.intercept {
            coefficient_names.push("(Intercept)".to_string());
            columns.push(vec![1.0; n_rows]);
        }

        // Without an intercept the first factor keeps all of its levels
        let mut full_rank_factor_pending = !spec.intercept;

        for term in &spec.terms {
            let term_columns = match term {
                Term::Main(p) => {
                    let keep_all = p.is_factor() && full_rank_factor_pending;
                    if keep_all {
                        full_rank_factor_pending = false;
                    }
                    Self::predictor_columns(source, p, &reference_levels, keep_all)?
                }
                Term::Interaction(a, b) => {
                    let a_all = a.is_factor() && !b.is_factor() && !spec.has_main(&b.name);
                    let b_all = b.is_factor() && !a.is_factor() && !spec.has_main(&a.name);
                    let cols_a = Self::predictor_columns(source, a, &reference_levels, a_all)?;
                    let cols_b = Self::predictor_columns(source, b, &reference_levels, b_all)?;

                    let mut out = Vec::with_capacity(cols_a.len() * cols_b.len());
                    for (name_a, col_a) in &cols_a {
                        for (name_b, col_b) in &cols_b {
                            let col: Vec<f64> =
                                col_a.iter().zip(col_b.iter()).map(|(x, y)| x * y).collect();
                            out.push((format!("{}:{}", name_a, name_b), col));
                        }
                    }
                    out
                }
            };

            for (name, col) in term_columns {
                coefficient_names.push(name);
                columns.push(col);
            }
        }

        if columns.is_empty() {
            return Err(CasiError::InvalidParameter(format!(
                "model '{}' has no columns",
                spec
            )));
        }

        let mut matrix = DMatrix::zeros(n_rows, columns.len());
        for (col_idx, col) in columns.iter().enumerate() {
            for (row_idx, &val) in col.iter().enumerate() {
                matrix[(row_idx, col_idx)] = val;
            }
        }

        Ok(Self {
            matrix,
            coefficient_names,
            row_ids,
            reference_levels,
        })
    }

    /// Response vector for a model spec.
    pub fn response<C: Columns + ?Sized>(source: &C, spec: &ModelSpec) -> Result<DVector<f64>> {
        let y = source.numeric_column(&spec.response)?;
        Ok(DVector::from_vec(y))
    }

    /// Columns contributed by one predictor.
    fn predictor_columns<C: Columns + ?Sized>(
        source: &C,
        predictor: &Predictor,
        reference_levels: &HashMap<String, String>,
        keep_all_levels: bool,
    ) -> Result<TermColumns> {
        match predictor.coding {
            crate::data::Coding::Numeric { divisor } => {
                if divisor == 0.0 {
                    return Err(CasiError::InvalidParameter(format!(
                        "divisor for '{}' must be non-zero",
                        predictor.name
                    )));
                }
                let col: Vec<f64> = source
                    .numeric_column(&predictor.name)?
                    .into_iter()
                    .map(|x| x / divisor)
                    .collect();
                Ok(vec![(predictor.label(), col)])
            }
            crate::data::Coding::Factor => {
                let values = source.column(&predictor.name)?;
                let labels: Vec<String> = values
                    .iter()
                    .enumerate()
                    .map(|(row, v)| {
                        v.level_label().ok_or_else(|| CasiError::InvalidValue {
                            value: "NA".to_string(),
                            row,
                            column: predictor.name.clone(),
                        })
                    })
                    .collect::<Result<_>>()?;
                let levels = source.levels(&predictor.name)?;
                let ref_level = reference_levels.get(&predictor.name);

                let mut result = Vec::new();
                for level in &levels {
                    if !keep_all_levels && Some(level) == ref_level {
                        continue;
                    }
                    let col: Vec<f64> = labels
                        .iter()
                        .map(|s| if s == level { 1.0 } else { 0.0 })
                        .collect();
                    result.push((format!("{}{}", predictor.name, level), col));
                }
                Ok(result)
            }
        }
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Get row IDs.
    pub fn row_ids(&self) -> &[String] {
        &self.row_ids
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the reference level for a factor.
    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Check if the matrix has an intercept.
    pub fn has_intercept(&self) -> bool {
        self.coefficient_names.first().map(String::as_str) == Some("(Intercept)")
    }
}

/// In-memory column source, mainly for building small designs by hand.
#[derive(Debug, Clone, Default)]
pub struct ColumnFrame {
    columns: Vec<(String, Vec<Variable>)>,
    n_rows: usize,
}

impl ColumnFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a numeric column.
    pub fn with_numeric(self, name: &str, values: &[f64]) -> Self {
        self.with_column(name, values.iter().map(|x| Variable::Continuous(*x)).collect())
    }

    /// Add a categorical column.
    pub fn with_categorical(self, name: &str, values: &[&str]) -> Self {
        self.with_column(
            name,
            values
                .iter()
                .map(|s| Variable::Categorical(s.to_string()))
                .collect(),
        )
    }

    fn with_column(mut self, name: &str, values: Vec<Variable>) -> Self {
        self.n_rows = values.len();
        self.columns.push((name.to_string(), values));
        self
    }
}

impl Columns for ColumnFrame {
    fn n_rows(&self) -> usize {
        self.n_rows
    }

    fn column(&self, name: &str) -> Result<Vec<Variable>> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| CasiError::MissingColumn {
                column: name.to_string(),
                table: "column frame".to_string(),
            })
    }

    fn row_ids(&self) -> Vec<String> {
        (1..=self.n_rows).map(|i| i.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_frame() -> ColumnFrame {
        ColumnFrame::new()
            .with_categorical("disp", &["water", "calgon", "water", "calgon"])
            .with_numeric("stime", &[0.0, 5.0, 10.0, 15.0])
            .with_numeric("depth", &[10.0, 30.0, 50.0, 70.0])
            .with_categorical("topsub", &["topsoil", "topsoil", "subsoil", "subsoil"])
            .with_numeric("casi", &[0.1, 0.2, 0.3, 0.4])
    }

    #[test]
    fn test_intercept_only() {
        let frame = create_test_frame();
        let dm = DesignMatrix::from_spec(&frame, &ModelSpec::new("casi")).unwrap();

        assert_eq!(dm.n_rows(), 4);
        assert_eq!(dm.n_coefficients(), 1);
        assert_eq!(dm.coefficient_names(), &["(Intercept)"]);
        assert!(dm.matrix().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_scaled_numeric() {
        let frame = create_test_frame();
        let spec = ModelSpec::new("casi").main(Predictor::scaled("depth", 100.0));
        let dm = DesignMatrix::from_spec(&frame, &spec).unwrap();

        assert_eq!(dm.coefficient_names(), &["(Intercept)", "I(depth/100)"]);
        let col: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 1)]).collect();
        assert_eq!(col, vec![0.1, 0.3, 0.5, 0.7]);
    }

    #[test]
    fn test_factor_treatment_coding() {
        let frame = create_test_frame();
        let spec = ModelSpec::new("casi").main(Predictor::factor("disp"));
        let dm = DesignMatrix::from_spec(&frame, &spec).unwrap();

        assert_eq!(dm.coefficient_names(), &["(Intercept)", "dispwater"]);
        assert_eq!(dm.reference_level("disp"), Some("calgon"));
        let col: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 1)]).collect();
        assert_eq!(col, vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_crossed_factor_numeric() {
        let frame = create_test_frame();
        let dm = DesignMatrix::from_spec(&frame, &ModelSpec::site_model()).unwrap();

        assert_eq!(
            dm.coefficient_names(),
            &["(Intercept)", "I(depth/100)", "dispwater", "stime", "dispwater:stime"]
        );
        let interaction: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 4)]).collect();
        assert_eq!(interaction, vec![0.0, 0.0, 10.0, 0.0]);
    }

    #[test]
    fn test_interaction_without_numeric_main_keeps_all_levels() {
        let frame = create_test_frame();
        let dm = DesignMatrix::from_spec(&frame, &ModelSpec::extreme_bounds()).unwrap();

        assert_eq!(
            dm.coefficient_names(),
            &[
                "(Intercept)",
                "topsubtopsoil",
                "dispwater",
                "dispcalgon:stime",
                "dispwater:stime"
            ]
        );
        let calgon_slope: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 3)]).collect();
        assert_eq!(calgon_slope, vec![0.0, 5.0, 0.0, 15.0]);
    }

    #[test]
    fn test_no_intercept_first_factor_full() {
        let frame = create_test_frame();
        let spec = ModelSpec::new("casi")
            .without_intercept()
            .main(Predictor::factor("disp"))
            .main(Predictor::factor("topsub"));
        let dm = DesignMatrix::from_spec(&frame, &spec).unwrap();

        assert!(!dm.has_intercept());
        assert_eq!(
            dm.coefficient_names(),
            &["dispcalgon", "dispwater", "topsubtopsoil"]
        );
    }

    #[test]
    fn test_missing_column() {
        let frame = create_test_frame();
        let spec = ModelSpec::new("casi").main(Predictor::factor("trt"));
        let err = DesignMatrix::from_spec(&frame, &spec).unwrap_err();
        assert!(err.to_string().contains("trt"));
    }

    #[test]
    fn test_response() {
        let frame = create_test_frame();
        let y = DesignMatrix::response(&frame, &ModelSpec::new("casi")).unwrap();
        assert_eq!(y.len(), 4);
        assert_eq!(y[3], 0.4);
    }
}
