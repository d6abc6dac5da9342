//! The enriched per-sample table consumed by profiling and modelling.

use crate::compose::ClrTriple;
use crate::data::{Columns, Sample, Variable};
use crate::error::{CasiError, Result};

/// One sample with its composition, reference, index and covariates.
#[derive(Debug, Clone, PartialEq)]
pub struct CasiRecord {
    pub sample: Sample,
    /// Closed (sand, silt, clay) proportions.
    pub closed: [f64; 3],
    pub clr: ClrTriple,
    /// CLR coordinates of the ssid's reference row.
    pub reference: ClrTriple,
    pub casi: f64,
    /// Covariate values aligned with [`CasiTable::covariate_names`].
    pub covariates: Vec<Option<f64>>,
}

/// Samples with CASI values, read-only after derivation.
#[derive(Debug, Clone, Default)]
pub struct CasiTable {
    pub rows: Vec<CasiRecord>,
    covariate_names: Vec<String>,
}

impl CasiTable {
    pub fn new(rows: Vec<CasiRecord>, covariate_names: Vec<String>) -> Self {
        Self {
            rows,
            covariate_names,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CasiRecord> {
        self.rows.iter()
    }

    pub fn covariate_names(&self) -> &[String] {
        &self.covariate_names
    }

    /// CASI values in row order.
    pub fn casi_values(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.casi).collect()
    }

    /// Rows matching a predicate, as a new table.
    pub fn filter<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(usize, &CasiRecord) -> bool,
    {
        Self {
            rows: self
                .rows
                .iter()
                .enumerate()
                .filter(|(i, r)| keep(*i, r))
                .map(|(_, r)| r.clone())
                .collect(),
            covariate_names: self.covariate_names.clone(),
        }
    }

    /// Distinct values of a string field in order of first appearance.
    pub fn distinct<F>(&self, field: F) -> Vec<String>
    where
        F: Fn(&CasiRecord) -> &str,
    {
        let mut seen = Vec::new();
        for r in &self.rows {
            let v = field(r);
            if !seen.iter().any(|s: &String| s == v) {
                seen.push(v.to_string());
            }
        }
        seen
    }
}

fn categorical(values: impl Iterator<Item = String>) -> Vec<Variable> {
    values.map(Variable::Categorical).collect()
}

fn continuous(values: impl Iterator<Item = f64>) -> Vec<Variable> {
    values.map(Variable::Continuous).collect()
}

impl Columns for CasiTable {
    fn n_rows(&self) -> usize {
        self.rows.len()
    }

    fn column(&self, name: &str) -> Result<Vec<Variable>> {
        let values = match name {
            "ssid" => categorical(self.rows.iter().map(|r| r.sample.ssid.clone())),
            "site" => categorical(self.rows.iter().map(|r| r.sample.site.clone())),
            "pid" => categorical(self.rows.iter().map(|r| r.sample.pid.clone())),
            "disp" => categorical(self.rows.iter().map(|r| r.sample.disp.clone())),
            "trt" => categorical(self.rows.iter().map(|r| r.sample.trt.clone())),
            "topsub" => categorical(self.rows.iter().map(|r| r.sample.topsub.clone())),
            "stime" => continuous(self.rows.iter().map(|r| r.sample.stime)),
            "depth" => continuous(self.rows.iter().map(|r| r.sample.depth)),
            "sand" => continuous(self.rows.iter().map(|r| r.sample.sand)),
            "silt" => continuous(self.rows.iter().map(|r| r.sample.silt)),
            "clay" => continuous(self.rows.iter().map(|r| r.sample.clay)),
            "lat" => continuous(self.rows.iter().map(|r| r.sample.lat)),
            "lon" => continuous(self.rows.iter().map(|r| r.sample.lon)),
            "csand" => continuous(self.rows.iter().map(|r| r.clr.csand)),
            "csilt" => continuous(self.rows.iter().map(|r| r.clr.csilt)),
            "cclay" => continuous(self.rows.iter().map(|r| r.clr.cclay)),
            "ref_csand" => continuous(self.rows.iter().map(|r| r.reference.csand)),
            "ref_csilt" => continuous(self.rows.iter().map(|r| r.reference.csilt)),
            "ref_cclay" => continuous(self.rows.iter().map(|r| r.reference.cclay)),
            "casi" => continuous(self.rows.iter().map(|r| r.casi)),
            other => {
                let idx = self
                    .covariate_names
                    .iter()
                    .position(|n| n == other)
                    .ok_or_else(|| CasiError::MissingColumn {
                        column: other.to_string(),
                        table: "CASI table".to_string(),
                    })?;
                self.rows
                    .iter()
                    .map(|r| match r.covariates.get(idx).copied().flatten() {
                        Some(x) => Variable::Continuous(x),
                        None => Variable::Missing,
                    })
                    .collect()
            }
        };
        Ok(values)
    }

    fn row_ids(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| format!("{}:{}:{}", r.sample.ssid, r.sample.disp, r.sample.trt))
            .collect()
    }
}
