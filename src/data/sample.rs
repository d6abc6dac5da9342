//! LDPSA measurement table.

use crate::error::{CasiError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Columns the measurement table must provide.
pub const REQUIRED_COLUMNS: [&str; 13] = [
    "ssid", "site", "pid", "disp", "trt", "stime", "depth", "topsub", "sand", "silt", "clay",
    "lat", "lon",
];

/// One laser-diffraction particle-size measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Soil sample identifier shared by all treatments of the same material.
    pub ssid: String,
    /// Site identifier.
    pub site: String,
    /// Profile identifier (unique within a site).
    pub pid: String,
    /// Dispersion treatment (`water`, `calgon`).
    pub disp: String,
    /// Treatment code; the reference condition is `c4`.
    pub trt: String,
    /// Sonication time.
    pub stime: f64,
    /// Sample depth.
    pub depth: f64,
    /// Depth class (`topsoil`, `subsoil`).
    pub topsub: String,
    /// Sand fraction (%).
    pub sand: f64,
    /// Silt fraction (%).
    pub silt: f64,
    /// Clay fraction (%).
    pub clay: f64,
    pub lat: f64,
    pub lon: f64,
}

impl Sample {
    /// Short human-readable locator used in diagnostics.
    pub fn locator(&self) -> String {
        format!(
            "ssid={} trt={} disp={} stime={}",
            self.ssid,
            self.trt,
            self.disp,
            crate::data::format_number(self.stime)
        )
    }

    /// Raw fractions in (sand, silt, clay) order.
    pub fn fractions(&self) -> [f64; 3] {
        [self.sand, self.silt, self.clay]
    }
}

/// The measurement table in file order.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    samples: Vec<Sample>,
}

impl SampleTable {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Load a comma-separated measurement table.
    ///
    /// All [`REQUIRED_COLUMNS`] must be present in the header; extra columns
    /// are ignored.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_reader(file, &path.display().to_string())
    }

    /// Load a measurement table from any reader; `table` names it in errors.
    pub fn from_reader<R: Read>(reader: R, table: &str) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let headers = rdr.headers()?.clone();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(CasiError::MissingColumn {
                    column: column.to_string(),
                    table: table.to_string(),
                });
            }
        }

        let samples: Vec<Sample> = rdr
            .deserialize()
            .collect::<std::result::Result<_, csv::Error>>()?;

        if samples.is_empty() {
            return Err(CasiError::EmptyData(format!("no rows in {}", table)));
        }

        log::info!("Loaded {} measurements from {}", samples.len(), table);
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "ssid,site,pid,disp,trt,stime,depth,topsub,sand,silt,clay,lat,lon";

    #[test]
    fn test_from_csv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{},extra", HEADER).unwrap();
        writeln!(file, "S1,A,P1,water,c4,0,10,topsoil,40,40,20,45.1,-75.2,x").unwrap();
        writeln!(file, "S1,A,P1,water,w1,5,10,topsoil,35,42,23,45.1,-75.2,y").unwrap();
        file.flush().unwrap();

        let table = SampleTable::from_csv(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        let first = &table.samples()[0];
        assert_eq!(first.ssid, "S1");
        assert_eq!(first.trt, "c4");
        assert_eq!(first.fractions(), [40.0, 40.0, 20.0]);
        assert_eq!(table.samples()[1].stime, 5.0);
    }

    #[test]
    fn test_missing_column_named() {
        let data = "ssid,site,pid,disp,trt,stime,depth,topsub,sand,silt,lat,lon\n\
                    S1,A,P1,water,c4,0,10,topsoil,40,40,45.1,-75.2\n";
        let err = SampleTable::from_reader(data.as_bytes(), "measurements.csv").unwrap_err();
        match err {
            CasiError::MissingColumn { column, table } => {
                assert_eq!(column, "clay");
                assert_eq!(table, "measurements.csv");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_malformed_value() {
        let data = format!("{}\nS1,A,P1,water,c4,zero,10,topsoil,40,40,20,45.1,-75.2\n", HEADER);
        assert!(SampleTable::from_reader(data.as_bytes(), "m").is_err());
    }

    #[test]
    fn test_empty_table() {
        let data = format!("{}\n", HEADER);
        let err = SampleTable::from_reader(data.as_bytes(), "m").unwrap_err();
        assert!(matches!(err, CasiError::EmptyData(_)));
    }

    #[test]
    fn test_locator() {
        let data = format!("{}\nS9,A,P1,calgon,c1,2.5,10,topsoil,40,40,20,45.1,-75.2\n", HEADER);
        let table = SampleTable::from_reader(data.as_bytes(), "m").unwrap();
        assert_eq!(
            table.samples()[0].locator(),
            "ssid=S9 trt=c1 disp=calgon stime=2.5"
        );
    }
}
