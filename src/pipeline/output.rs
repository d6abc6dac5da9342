//! Machine-readable workflow artifacts.

use crate::casi::CasiTable;
use crate::error::Result;
use crate::extreme::ExtremeBounds;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Fixed leading columns of the enriched CASI table.
pub const CASI_TABLE_COLUMNS: [&str; 22] = [
    "ssid", "site", "pid", "disp", "trt", "stime", "depth", "topsub", "sand", "silt", "clay",
    "lat", "lon", "p_sand", "p_silt", "p_clay", "csand", "csilt", "cclay", "ref_csand",
    "ref_csilt", "ref_cclay",
];

fn number(x: f64) -> String {
    if x.is_finite() {
        x.to_string()
    } else {
        "NA".to_string()
    }
}

/// Write the enriched table as CSV.
///
/// Columns: sample fields, closed proportions, CLR and reference CLR
/// coordinates, `casi`, then `lo`, `hi` and `extreme` when bounds are given,
/// then one column per covariate (`NA` when missing).
pub fn write_casi_table(path: &Path, table: &CasiTable, bounds: Option<&ExtremeBounds>) -> Result<()> {
    write_casi_csv(File::create(path)?, table, bounds)?;
    log::info!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Write the enriched table as CSV to any writer.
pub fn write_casi_csv<W: Write>(writer: W, table: &CasiTable, bounds: Option<&ExtremeBounds>) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header: Vec<String> = CASI_TABLE_COLUMNS.iter().map(|c| c.to_string()).collect();
    header.push("casi".to_string());
    if bounds.is_some() {
        header.extend(["lo", "hi", "extreme"].iter().map(|c| c.to_string()));
    }
    header.extend(table.covariate_names().iter().cloned());
    wtr.write_record(&header)?;

    for (i, r) in table.iter().enumerate() {
        let s = &r.sample;
        let mut record = vec![
            s.ssid.clone(),
            s.site.clone(),
            s.pid.clone(),
            s.disp.clone(),
            s.trt.clone(),
            number(s.stime),
            number(s.depth),
            s.topsub.clone(),
            number(s.sand),
            number(s.silt),
            number(s.clay),
            number(s.lat),
            number(s.lon),
            number(r.closed[0]),
            number(r.closed[1]),
            number(r.closed[2]),
            number(r.clr.csand),
            number(r.clr.csilt),
            number(r.clr.cclay),
            number(r.reference.csand),
            number(r.reference.csilt),
            number(r.reference.cclay),
            number(r.casi),
        ];
        if let Some(b) = bounds {
            record.push(b.lo.get(i).map_or_else(|| "NA".to_string(), |v| number(*v)));
            record.push(b.hi.get(i).map_or_else(|| "NA".to_string(), |v| number(*v)));
            record.push(
                b.labels
                    .get(i)
                    .map_or_else(|| "NA".to_string(), |l| l.to_string()),
            );
        }
        record.extend(
            r.covariates
                .iter()
                .map(|c| c.map_or_else(|| "NA".to_string(), number)),
        );
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write any serializable artifact as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}
