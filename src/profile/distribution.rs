//! Distribution profiling of CASI by dispersion and sonication time.

use crate::casi::CasiTable;
use crate::error::{CasiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Sample quantile of sorted data, R type 7 (linear interpolation
/// between order statistics at `h = (n − 1) p`).
pub fn quantile_type7(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = h.ceil() as usize;
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Five-number summary plus mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub n: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
}

impl Summary {
    /// Summarise finite values; `None` when there are none.
    pub fn of(values: &[f64]) -> Option<Self> {
        let sorted = sorted_finite(values);
        let n = sorted.len();
        if n == 0 {
            return None;
        }
        Some(Self {
            n,
            min: sorted[0],
            q1: quantile_type7(&sorted, 0.25),
            median: quantile_type7(&sorted, 0.5),
            q3: quantile_type7(&sorted, 0.75),
            max: sorted[n - 1],
            mean: sorted.iter().sum::<f64>() / n as f64,
        })
    }

    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }
}

/// Tukey box statistics: whiskers reach the most extreme values within
/// 1.5 IQR of the hinges; everything beyond is an outlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxStats {
    pub lower_whisker: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub upper_whisker: f64,
    pub outliers: Vec<f64>,
}

impl BoxStats {
    pub fn of(values: &[f64]) -> Option<Self> {
        let summary = Summary::of(values)?;
        let lower_fence = summary.q1 - 1.5 * summary.iqr();
        let upper_fence = summary.q3 + 1.5 * summary.iqr();
        let sorted = sorted_finite(values);

        let inside: Vec<f64> = sorted
            .iter()
            .copied()
            .filter(|v| *v >= lower_fence && *v <= upper_fence)
            .collect();
        let outliers = sorted
            .iter()
            .copied()
            .filter(|v| *v < lower_fence || *v > upper_fence)
            .collect();

        Some(Self {
            lower_whisker: inside.first().copied().unwrap_or(summary.q1),
            q1: summary.q1,
            median: summary.median,
            q3: summary.q3,
            upper_whisker: inside.last().copied().unwrap_or(summary.q3),
            outliers,
        })
    }
}

/// CASI summary for one (dispersion, sonication time) cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub disp: String,
    pub stime: f64,
    pub casi: Summary,
}

/// Counts and grouped summaries of the CASI table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionProfile {
    /// Number of rows.
    pub n_rows: usize,
    /// Distinct sites.
    pub n_sites: usize,
    /// Distinct profiles (site:pid).
    pub n_profiles: usize,
    /// Distinct ssids.
    pub n_ssids: usize,
    /// Overall CASI summary.
    pub casi: Summary,
    /// Summaries ordered by dispersion then sonication time.
    pub groups: Vec<GroupSummary>,
}

impl DistributionProfile {
    /// Summaries for one dispersion treatment.
    pub fn groups_for(&self, disp: &str) -> Vec<&GroupSummary> {
        self.groups.iter().filter(|g| g.disp == disp).collect()
    }
}

impl std::fmt::Display for DistributionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "CASI Distribution Profile")?;
        writeln!(f, "  Rows:     {}", self.n_rows)?;
        writeln!(f, "  Sites:    {}", self.n_sites)?;
        writeln!(f, "  Profiles: {}", self.n_profiles)?;
        writeln!(f, "  Samples:  {}", self.n_ssids)?;
        writeln!(
            f,
            "  CASI:     median {:.3} (IQR {:.3} to {:.3})",
            self.casi.median, self.casi.q1, self.casi.q3
        )?;
        for g in &self.groups {
            writeln!(
                f,
                "    {:<8} stime {:>6}: n = {:>4}, median {:.3}",
                g.disp,
                crate::data::format_number(g.stime),
                g.casi.n,
                g.casi.median
            )?;
        }
        Ok(())
    }
}

/// Profile the CASI distribution.
pub fn profile_casi(table: &CasiTable) -> Result<DistributionProfile> {
    let casi = Summary::of(&table.casi_values()).ok_or_else(|| {
        CasiError::EmptyData("no finite CASI values to profile".to_string())
    })?;

    let sites: BTreeSet<&str> = table.iter().map(|r| r.sample.site.as_str()).collect();
    let profiles: BTreeSet<(&str, &str)> = table
        .iter()
        .map(|r| (r.sample.site.as_str(), r.sample.pid.as_str()))
        .collect();
    let ssids: BTreeSet<&str> = table.iter().map(|r| r.sample.ssid.as_str()).collect();

    let mut cells: Vec<(String, f64)> = Vec::new();
    for r in table.iter() {
        let key = (r.sample.disp.clone(), r.sample.stime);
        if !cells.contains(&key) {
            cells.push(key);
        }
    }
    cells.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let groups = cells
        .into_iter()
        .filter_map(|(disp, stime)| {
            let values: Vec<f64> = table
                .iter()
                .filter(|r| r.sample.disp == disp && r.sample.stime == stime)
                .map(|r| r.casi)
                .collect();
            Summary::of(&values).map(|casi| GroupSummary { disp, stime, casi })
        })
        .collect();

    Ok(DistributionProfile {
        n_rows: table.len(),
        n_sites: sites.len(),
        n_profiles: profiles.len(),
        n_ssids: ssids.len(),
        casi,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casi::CasiRecord;
    use crate::compose::ClrTriple;
    use crate::data::Sample;
    use approx::assert_relative_eq;

    #[test]
    fn test_quantile_type7() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        // quantile(1:4, c(0.25, 0.5, 0.9), type = 7) = 1.75, 2.5, 3.7
        assert_relative_eq!(quantile_type7(&sorted, 0.25), 1.75);
        assert_relative_eq!(quantile_type7(&sorted, 0.5), 2.5);
        assert_relative_eq!(quantile_type7(&sorted, 0.9), 3.7, epsilon = 1e-12);
        assert_eq!(quantile_type7(&sorted, 0.0), 1.0);
        assert_eq!(quantile_type7(&sorted, 1.0), 4.0);
        assert_eq!(quantile_type7(&[7.0], 0.3), 7.0);
        assert!(quantile_type7(&[], 0.5).is_nan());
    }

    #[test]
    fn test_summary_and_box_stats() {
        let values = [5.0, 1.0, 3.0, 2.0, 4.0, 40.0];
        let s = Summary::of(&values).unwrap();
        assert_eq!(s.n, 6);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 40.0);
        assert_relative_eq!(s.q1, 2.25);
        assert_relative_eq!(s.median, 3.5);
        assert_relative_eq!(s.q3, 4.75);
        assert_relative_eq!(s.mean, 55.0 / 6.0);

        let b = BoxStats::of(&values).unwrap();
        assert_eq!(b.lower_whisker, 1.0);
        assert_eq!(b.upper_whisker, 5.0);
        assert_eq!(b.outliers, vec![40.0]);

        assert!(Summary::of(&[]).is_none());
        assert!(Summary::of(&[f64::NAN]).is_none());
    }

    fn record(ssid: &str, site: &str, pid: &str, disp: &str, stime: f64, casi: f64) -> CasiRecord {
        let clr = ClrTriple { csand: 0.0, csilt: 0.0, cclay: 0.0 };
        CasiRecord {
            sample: Sample {
                ssid: ssid.to_string(),
                site: site.to_string(),
                pid: pid.to_string(),
                disp: disp.to_string(),
                trt: "w1".to_string(),
                stime,
                depth: 10.0,
                topsub: "topsoil".to_string(),
                sand: 40.0,
                silt: 40.0,
                clay: 20.0,
                lat: 45.0,
                lon: -75.0,
            },
            closed: [0.4, 0.4, 0.2],
            clr,
            reference: clr,
            casi,
            covariates: Vec::new(),
        }
    }

    #[test]
    fn test_profile_groups() {
        let table = CasiTable::new(
            vec![
                record("S1", "A", "P1", "water", 10.0, 1.0),
                record("S1", "A", "P1", "water", 0.0, 0.0),
                record("S2", "A", "P2", "calgon", 0.0, 0.5),
                record("S3", "B", "P1", "water", 10.0, 3.0),
                record("S3", "B", "P1", "calgon", 0.0, 1.5),
            ],
            Vec::new(),
        );
        let profile = profile_casi(&table).unwrap();

        assert_eq!(profile.n_rows, 5);
        assert_eq!(profile.n_sites, 2);
        assert_eq!(profile.n_profiles, 3);
        assert_eq!(profile.n_ssids, 3);

        let keys: Vec<(&str, f64)> = profile
            .groups
            .iter()
            .map(|g| (g.disp.as_str(), g.stime))
            .collect();
        assert_eq!(keys, vec![("calgon", 0.0), ("water", 0.0), ("water", 10.0)]);
        assert_eq!(profile.groups[0].casi.n, 2);
        assert_relative_eq!(profile.groups[0].casi.median, 1.0);
        assert_relative_eq!(profile.groups[2].casi.mean, 2.0);
        assert_eq!(profile.groups_for("water").len(), 2);
    }
}
