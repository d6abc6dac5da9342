//! Per-ssid auxiliary soil properties.

use crate::error::{CasiError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Static soil properties keyed by `ssid`.
///
/// Every column other than `ssid` is read as numeric; empty cells and `NA`
/// are missing. An ssid may appear on one row only.
#[derive(Debug, Clone, Default)]
pub struct CovariateTable {
    names: Vec<String>,
    rows: HashMap<String, Vec<Option<f64>>>,
}

impl CovariateTable {
    /// Load a comma-separated covariate table.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_reader(file, &path.display().to_string())
    }

    /// Load covariates from any reader; `table` names it in errors.
    pub fn from_reader<R: Read>(reader: R, table: &str) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers()?.clone();

        let ssid_idx = headers
            .iter()
            .position(|h| h == "ssid")
            .ok_or_else(|| CasiError::MissingColumn {
                column: "ssid".to_string(),
                table: table.to_string(),
            })?;

        let value_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != ssid_idx)
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut rows = HashMap::new();
        for (row_idx, record) in rdr.records().enumerate() {
            let record = record?;
            let ssid = record.get(ssid_idx).unwrap_or_default().to_string();
            let mut values = Vec::with_capacity(value_columns.len());
            for (col_idx, name) in &value_columns {
                let raw = record.get(*col_idx).unwrap_or_default();
                let value = if raw.is_empty() || raw.eq_ignore_ascii_case("na") {
                    None
                } else {
                    Some(raw.parse::<f64>().map_err(|_| CasiError::InvalidValue {
                        value: raw.to_string(),
                        row: row_idx + 1,
                        column: name.clone(),
                    })?)
                };
                values.push(value);
            }
            if rows.contains_key(&ssid) {
                return Err(CasiError::DuplicateCovariates(ssid));
            }
            rows.insert(ssid, values);
        }

        log::info!(
            "Loaded covariates for {} ssids ({} columns) from {}",
            rows.len(),
            value_columns.len(),
            table
        );

        Ok(Self {
            names: value_columns.into_iter().map(|(_, n)| n).collect(),
            rows,
        })
    }

    /// Build from in-memory rows.
    pub fn from_rows(names: Vec<String>, rows: HashMap<String, Vec<Option<f64>>>) -> Self {
        Self { names, rows }
    }

    /// Covariate column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Covariate values for an ssid.
    pub fn get(&self, ssid: &str) -> Option<&[Option<f64>]> {
        self.rows.get(ssid).map(|v| v.as_slice())
    }

    /// Number of ssids with covariates.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
