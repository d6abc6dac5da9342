//! Reference selection and CASI computation.

use crate::casi::table::{CasiRecord, CasiTable};
use crate::compose::{ClrTriple, ComposedTable};
use crate::data::CovariateTable;
use crate::error::{CasiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Row accounting for the joins performed while deriving CASI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CasiReport {
    /// Rows entering the reference join.
    pub n_input: usize,
    /// Rows dropped because their ssid has no reference row.
    pub n_without_reference: usize,
    /// The ssids without a reference row, sorted.
    pub ssids_without_reference: Vec<String>,
    /// Rows dropped because their ssid has no covariates.
    pub n_without_covariates: usize,
    /// The ssids without covariates, sorted.
    pub ssids_without_covariates: Vec<String>,
    /// Rows in the final table.
    pub n_output: usize,
}

/// Aggregate stability index of a sample against its reference.
///
/// The combination is `Δcsand + Δcsilt + Δcsilt`. Because CLR coordinates
/// sum to zero, `Δcsand + Δcsilt + Δcclay` is identically zero, so the
/// silt difference is counted twice instead of adding the clay one. This
/// equals `Δcsilt − Δcclay`.
pub fn casi_index(sample: &ClrTriple, reference: &ClrTriple) -> f64 {
    let d_sand = sample.csand - reference.csand;
    let d_silt = sample.csilt - reference.csilt;
    d_sand + d_silt + d_silt
}

/// Reference CLR coordinates per ssid.
///
/// More than one reference row for an ssid is an error.
pub fn select_references(
    table: &ComposedTable,
    reference_treatment: &str,
) -> Result<HashMap<String, ClrTriple>> {
    let mut references = HashMap::new();
    for row in table.rows.iter().filter(|r| r.sample.trt == reference_treatment) {
        if references
            .insert(row.sample.ssid.clone(), row.clr)
            .is_some()
        {
            return Err(CasiError::DuplicateReference(row.sample.ssid.clone()));
        }
    }
    Ok(references)
}

/// Inner-join every row to its reference by ssid and compute CASI.
///
/// Rows whose ssid has no reference are dropped and counted in the report.
pub fn derive_casi(
    table: &ComposedTable,
    reference_treatment: &str,
) -> Result<(CasiTable, CasiReport)> {
    let references = select_references(table, reference_treatment)?;
    if references.is_empty() {
        return Err(CasiError::EmptyData(format!(
            "no reference rows with trt == '{}'",
            reference_treatment
        )));
    }

    let mut rows = Vec::with_capacity(table.len());
    let mut missing: BTreeSet<String> = BTreeSet::new();
    let mut n_without_reference = 0;

    for row in &table.rows {
        match references.get(&row.sample.ssid) {
            Some(reference) => rows.push(CasiRecord {
                sample: row.sample.clone(),
                closed: row.closed,
                clr: row.clr,
                reference: *reference,
                casi: casi_index(&row.clr, reference),
                covariates: Vec::new(),
            }),
            None => {
                n_without_reference += 1;
                missing.insert(row.sample.ssid.clone());
            }
        }
    }

    if n_without_reference > 0 {
        log::warn!(
            "Dropped {} rows from {} ssids without a '{}' reference",
            n_without_reference,
            missing.len(),
            reference_treatment
        );
    }

    let report = CasiReport {
        n_input: table.len(),
        n_without_reference,
        ssids_without_reference: missing.into_iter().collect(),
        n_output: rows.len(),
        ..Default::default()
    };

    Ok((CasiTable::new(rows, Vec::new()), report))
}

/// Inner-join covariates by ssid.
///
/// Rows whose ssid has no covariate row are dropped and counted.
pub fn join_covariates(
    table: &CasiTable,
    covariates: &CovariateTable,
    report: &mut CasiReport,
) -> CasiTable {
    let mut rows = Vec::with_capacity(table.len());
    let mut missing: BTreeSet<String> = BTreeSet::new();
    let mut dropped = 0;

    for record in table.iter() {
        match covariates.get(&record.sample.ssid) {
            Some(values) => {
                let mut enriched = record.clone();
                enriched.covariates = values.to_vec();
                rows.push(enriched);
            }
            None => {
                dropped += 1;
                missing.insert(record.sample.ssid.clone());
            }
        }
    }

    if dropped > 0 {
        log::warn!(
            "Dropped {} rows from {} ssids without covariates",
            dropped,
            missing.len()
        );
    }

    report.n_without_covariates = dropped;
    report.ssids_without_covariates = missing.into_iter().collect();
    report.n_output = rows.len();

    CasiTable::new(rows, covariates.names().to_vec())
}
