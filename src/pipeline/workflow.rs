//! Stage functions of the CASI workflow and the end-to-end runner.
//!
//! Each stage takes the [`WorkflowConfig`] by reference and can be called on
//! its own; [`run`] chains them and writes every artifact below
//! `output_dir`.

use crate::casi::{derive_casi, join_covariates, CasiReport, CasiTable};
use crate::compose::compose;
use crate::data::{CovariateTable, DesignMatrix, MixedModelSpec, RandomDesignMatrix, SampleTable};
use crate::error::Result;
use crate::extreme::{label_extremes, ExtremeBounds};
use crate::fetch::{fetch_archive, FetchedArchive};
use crate::model::{model_lmm, LmmFit, RandomIntercept, VarianceComponent};
use crate::pipeline::config::WorkflowConfig;
use crate::pipeline::output::{write_casi_table, write_json};
use crate::profile::{
    casi_boxplot, coefficient_plot, profile_casi, site_map, ternary, DistributionProfile,
    TernaryColour,
};
use crate::report::HtmlReport;
use crate::test::{test_wald_lmm, FixedEffectTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const CASI_TABLE_FILE: &str = "casi_table.csv";
pub const EXTREME_BOUNDS_FILE: &str = "extreme_bounds.json";
pub const SITE_MODEL_FILE: &str = "site_model.json";
pub const PROFILE_FILE: &str = "profile_summary.json";
pub const REPORT_FILE: &str = "report.html";

/// The two input tables.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub samples: SampleTable,
    pub covariates: CovariateTable,
}

/// Fitted multilevel site model with its Wald table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteModel {
    /// Model in formula notation.
    pub model: String,
    pub n_obs: usize,
    pub fixed_effects: FixedEffectTable,
    pub variance_components: Vec<VarianceComponent>,
    pub residual_variance: f64,
    /// `−2 log L_R` at the estimates.
    pub reml_criterion: f64,
    pub iterations: usize,
    /// Random intercepts of the outermost grouping level.
    pub site_effects: Vec<RandomIntercept>,
    /// Random intercepts of the innermost grouping level (empty with a
    /// single level).
    pub profile_effects: Vec<RandomIntercept>,
}

impl SiteModel {
    /// Assemble from a converged fit.
    pub fn from_fit(spec: &MixedModelSpec, fit: &LmmFit) -> Result<Self> {
        let fixed_effects = test_wald_lmm(fit)?;
        let n_levels = spec.random.n_levels();

        let level_effects = |k: usize| -> Vec<RandomIntercept> {
            fit.random_effects_for(&spec.random.group_label(k))
                .into_iter()
                .cloned()
                .collect()
        };
        let site_effects = level_effects(0);
        let profile_effects = if n_levels > 1 {
            level_effects(n_levels - 1)
        } else {
            Vec::new()
        };

        Ok(Self {
            model: spec.to_string(),
            n_obs: fit.n_obs,
            fixed_effects,
            variance_components: fit.variance_components.clone(),
            residual_variance: fit.residual_variance,
            reml_criterion: fit.reml_criterion(),
            iterations: fit.iterations,
            site_effects,
            profile_effects,
        })
    }
}

impl std::fmt::Display for SiteModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Site model: {}", self.model)?;
        writeln!(
            f,
            "  n = {}, REML criterion {:.3}, {} iterations",
            self.n_obs, self.reml_criterion, self.iterations
        )?;
        writeln!(
            f,
            "  {:<20} {:>10} {:>10} {:>8} {:>10}",
            "term", "estimate", "std.err", "t", "p"
        )?;
        for row in &self.fixed_effects.rows {
            writeln!(
                f,
                "  {:<20} {:>10.4} {:>10.4} {:>8.2} {:>10.3e} {}",
                row.coefficient,
                row.estimate,
                row.std_error,
                row.statistic,
                row.p_value,
                row.significance
            )?;
        }
        for vc in &self.variance_components {
            writeln!(
                f,
                "  var({}) = {:.4} over {} groups",
                vc.group, vc.variance, vc.n_groups
            )?;
        }
        writeln!(f, "  var(residual) = {:.4}", self.residual_variance)
    }
}

/// Everything produced by a full run.
#[derive(Debug, Clone)]
pub struct WorkflowOutput {
    pub table: CasiTable,
    pub report: CasiReport,
    pub profile: DistributionProfile,
    pub bounds: ExtremeBounds,
    pub site_model: SiteModel,
    /// Files written below `output_dir`.
    pub artifacts: Vec<PathBuf>,
    /// SVG figures, a subset of `artifacts`.
    pub figures: Vec<PathBuf>,
}

/// Download and extract the input archive into `data_dir`.
pub fn fetch_data(config: &WorkflowConfig, force: bool) -> Result<FetchedArchive> {
    fetch_archive(&config.archive, &config.data_dir, force)
}

/// Read both input tables.
pub fn load_inputs(config: &WorkflowConfig) -> Result<Inputs> {
    let samples = SampleTable::from_csv(config.measurements_path())?;
    let covariates = CovariateTable::from_csv(config.covariates_path())?;
    Ok(Inputs {
        samples,
        covariates,
    })
}

/// Compose, derive CASI against the reference and join covariates.
pub fn derive_table(config: &WorkflowConfig, inputs: &Inputs) -> Result<(CasiTable, CasiReport)> {
    let composed = compose(&inputs.samples, &config.dispersions)?;
    let (table, mut report) = derive_casi(&composed, &config.reference_treatment)?;
    let table = join_covariates(&table, &inputs.covariates, &mut report);
    log::info!(
        "Derived CASI for {} rows ({} without reference, {} without covariates)",
        report.n_output,
        report.n_without_reference,
        report.n_without_covariates
    );
    Ok((table, report))
}

/// Fit the quantile bounds and label extremes.
pub fn label_table(config: &WorkflowConfig, table: &CasiTable) -> Result<ExtremeBounds> {
    let [lo, hi] = config.quantiles;
    label_extremes(
        table,
        &config.extreme_model,
        (lo, hi),
        config.prediction_scale,
        &config.quantile,
    )
}

/// Fit the multilevel site model on every row of the table.
pub fn fit_site_model(config: &WorkflowConfig, table: &CasiTable) -> Result<SiteModel> {
    let spec = &config.site_model;
    let y = DesignMatrix::response(table, &spec.fixed)?;
    let design = DesignMatrix::from_spec(table, &spec.fixed)?;
    let random = RandomDesignMatrix::from_nested(table, &spec.random)?;

    log::info!("Fitting {} on {} rows", spec, table.len());
    let fit = model_lmm(&y, &design, &random, &config.lmm)?.require_converged()?;
    log::info!(
        "Site model converged after {} iterations (REML criterion {:.3})",
        fit.iterations,
        fit.reml_criterion()
    );
    SiteModel::from_fit(spec, &fit)
}

/// Rows of one dispersion that go into its boxplot.
///
/// Rows labelled extreme are left out when `disp` is listed in
/// `boxplot_exclude_extremes`. Indices passed to `bounds` are full-table
/// indices, so `bounds` must be aligned with `table`.
pub fn boxplot_subset(
    config: &WorkflowConfig,
    table: &CasiTable,
    bounds: &ExtremeBounds,
    disp: &str,
) -> CasiTable {
    let exclude = config.boxplot_exclude_extremes.iter().any(|d| d == disp);
    table.filter(|i, r| r.sample.disp == disp && !(exclude && bounds.is_extreme(i)))
}

/// Draw every SVG figure into `output_dir` and return their paths.
///
/// Ternary diagrams and boxplots are drawn once per dispersion in
/// `config.dispersions`; a dispersion without rows is skipped.
pub fn render_figures(
    config: &WorkflowConfig,
    table: &CasiTable,
    bounds: &ExtremeBounds,
    site_model: &SiteModel,
) -> Result<Vec<PathBuf>> {
    let mut figures = Vec::new();

    let path = config.output_path("site_map.svg");
    site_map(&path, table)?;
    figures.push(path);

    for disp in &config.dispersions {
        let rows = table.filter(|_, r| &r.sample.disp == disp);
        if rows.is_empty() {
            log::warn!("No rows for dispersion '{}', skipping its figures", disp);
            continue;
        }

        let path = config.output_path(&format!("ternary_stime_{}.svg", disp));
        let title = format!("Particle-size fractions by sonication time ({})", disp);
        ternary(&path, &rows, TernaryColour::SonicationTime, &title)?;
        figures.push(path);

        let path = config.output_path(&format!("ternary_casi_{}.svg", disp));
        let title = format!("Particle-size fractions by CASI ({})", disp);
        ternary(&path, &rows, TernaryColour::Casi, &title)?;
        figures.push(path);

        let subset = boxplot_subset(config, table, bounds, disp);
        if subset.is_empty() {
            log::warn!("Every '{}' row is extreme, skipping its boxplot", disp);
            continue;
        }
        let exclude = config.boxplot_exclude_extremes.contains(disp);
        let title = if exclude {
            format!("CASI by sonication time ({}, extremes removed)", disp)
        } else {
            format!("CASI by sonication time ({})", disp)
        };
        let path = config.output_path(&format!("boxplot_{}.svg", disp));
        casi_boxplot(&path, &subset, &title)?;
        figures.push(path);
    }

    let effects: Vec<&RandomIntercept> = site_model.site_effects.iter().collect();
    let path = config.output_path("site_effects.svg");
    coefficient_plot(&path, &effects, "Site random intercepts (±2 SE)")?;
    figures.push(path);

    log::info!("Rendered {} figures", figures.len());
    Ok(figures)
}

/// Load, derive and write the enriched table without modelling.
pub fn derive_only(config: &WorkflowConfig) -> Result<(CasiTable, CasiReport)> {
    config.validate()?;
    fs::create_dir_all(&config.output_dir)?;

    let inputs = load_inputs(config)?;
    let (table, report) = derive_table(config, &inputs)?;
    write_casi_table(&config.output_path(CASI_TABLE_FILE), &table, None)?;
    Ok((table, report))
}

/// Run every stage and write all artifacts.
pub fn run(config: &WorkflowConfig) -> Result<WorkflowOutput> {
    config.validate()?;
    fs::create_dir_all(&config.output_dir)?;

    let inputs = load_inputs(config)?;
    let (table, report) = derive_table(config, &inputs)?;
    let profile = profile_casi(&table)?;
    let bounds = label_table(config, &table)?;
    let site_model = fit_site_model(config, &table)?;

    let mut artifacts = Vec::new();

    let path = config.output_path(CASI_TABLE_FILE);
    write_casi_table(&path, &table, Some(&bounds))?;
    artifacts.push(path);

    let path = config.output_path(EXTREME_BOUNDS_FILE);
    write_json(&path, &bounds)?;
    artifacts.push(path);

    let path = config.output_path(SITE_MODEL_FILE);
    write_json(&path, &site_model)?;
    artifacts.push(path);

    let path = config.output_path(PROFILE_FILE);
    write_json(&path, &profile)?;
    artifacts.push(path);

    let mut figures = Vec::new();
    if config.figures {
        figures = render_figures(config, &table, &bounds, &site_model)?;
        artifacts.extend(figures.iter().cloned());

        let path = config.output_path(REPORT_FILE);
        HtmlReport {
            config,
            report: &report,
            profile: &profile,
            bounds: &bounds,
            site_model: &site_model,
            figures: &figures,
        }
        .generate(&path)?;
        artifacts.push(path);
    }

    log::info!(
        "Workflow finished: {} rows, {} extreme, {} artifacts in {}",
        table.len(),
        bounds.n_extreme(),
        artifacts.len(),
        config.output_dir.display()
    );

    Ok(WorkflowOutput {
        table,
        report,
        profile,
        bounds,
        site_model,
        artifacts,
        figures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extreme::{ExtremeLabel, PredictionScale};
    use crate::model::QuantileFit;
    use tempfile::TempDir;

    const MEASUREMENTS: &str = "\
ssid,site,pid,disp,trt,stime,depth,topsub,sand,silt,clay,lat,lon
S1,A,P1,water,c4,0,10,topsoil,40,40,20,45.1,-75.1
S1,A,P1,water,w1,5,10,topsoil,30,45,25,45.1,-75.1
S1,A,P1,calgon,g1,5,10,topsoil,25,45,30,45.1,-75.1
S2,A,P2,water,w1,5,40,subsoil,35,40,25,45.2,-75.2
S3,B,P1,water,c4,0,15,topsoil,50,30,20,45.3,-75.3
S3,B,P1,fresh,f1,5,15,topsoil,45,35,20,45.3,-75.3
";

    const COVARIATES: &str = "ssid,ph,oc\nS1,6.5,NA\n";

    fn config(dir: &TempDir) -> WorkflowConfig {
        fs::write(dir.path().join("ldpsa.csv"), MEASUREMENTS).unwrap();
        fs::write(dir.path().join("covariates.csv"), COVARIATES).unwrap();
        WorkflowConfig {
            data_dir: dir.path().to_path_buf(),
            output_dir: dir.path().join("out"),
            ..Default::default()
        }
    }

    #[test]
    fn test_derive_only() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        let (table, report) = derive_only(&config).unwrap();
        // fresh dispersion filtered, S2 has no reference, S3 has no covariates
        assert_eq!(report.n_input, 5);
        assert_eq!(report.n_without_reference, 1);
        assert_eq!(report.ssids_without_reference, vec!["S2"]);
        assert_eq!(report.n_without_covariates, 1);
        assert_eq!(table.len(), 3);
        assert!(table.iter().all(|r| r.sample.ssid == "S1"));

        let csv = fs::read_to_string(config.output_path(CASI_TABLE_FILE)).unwrap();
        assert_eq!(csv.lines().count(), 4);
        assert!(csv.lines().next().unwrap().ends_with("casi,ph,oc"));
    }

    /// Bounds over `table` that label every non-reference row extreme.
    fn bounds_for(table: &CasiTable) -> ExtremeBounds {
        let fit = |tau: f64| QuantileFit {
            tau,
            coefficient_names: vec!["(Intercept)".to_string()],
            coefficients: vec![0.0],
            objective: 0.0,
            iterations: 1,
            converged: true,
        };
        let labels = table
            .iter()
            .map(|r| {
                if r.sample.trt == "c4" {
                    ExtremeLabel::Typical
                } else {
                    ExtremeLabel::Extreme
                }
            })
            .collect();
        ExtremeBounds {
            model: "casi ~ 1".to_string(),
            scale: PredictionScale::Linear,
            lower: fit(0.05),
            upper: fit(0.95),
            lo: vec![0.0; table.len()],
            hi: vec![0.0; table.len()],
            labels,
        }
    }

    fn site_model() -> SiteModel {
        SiteModel {
            model: "casi ~ 1 + (1 | site/pid)".to_string(),
            n_obs: 3,
            fixed_effects: FixedEffectTable { rows: Vec::new() },
            variance_components: Vec::new(),
            residual_variance: 1.0,
            reml_criterion: 0.0,
            iterations: 1,
            site_effects: vec![RandomIntercept {
                level: "site".to_string(),
                group: "A".to_string(),
                estimate: 0.1,
                std_error: 0.05,
            }],
            profile_effects: Vec::new(),
        }
    }

    #[test]
    fn test_boxplot_subset_drops_extremes_only_where_configured() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let (table, _) = derive_only(&config).unwrap();
        let bounds = bounds_for(&table);

        let water = boxplot_subset(&config, &table, &bounds, "water");
        assert_eq!(water.len(), 1);
        assert!(water.iter().all(|r| r.sample.trt == "c4"));

        let calgon = boxplot_subset(&config, &table, &bounds, "calgon");
        assert_eq!(calgon.len(), 1);
        assert_eq!(calgon.iter().next().unwrap().sample.trt, "g1");

        let keep_all = WorkflowConfig {
            boxplot_exclude_extremes: Vec::new(),
            ..config.clone()
        };
        assert_eq!(boxplot_subset(&keep_all, &table, &bounds, "water").len(), 2);
    }

    #[test]
    fn test_figures_per_dispersion() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let (table, _) = derive_only(&config).unwrap();
        let bounds = bounds_for(&table);

        let figures = render_figures(&config, &table, &bounds, &site_model()).unwrap();

        for disp in ["water", "calgon"] {
            for name in [
                format!("ternary_stime_{}.svg", disp),
                format!("ternary_casi_{}.svg", disp),
                format!("boxplot_{}.svg", disp),
            ] {
                let path = config.output_path(&name);
                assert!(path.exists(), "missing {}", name);
                assert!(figures.contains(&path));
            }
        }
        assert!(!config.output_path("ternary_stime.svg").exists());
        assert!(!config.output_path("ternary_casi.svg").exists());

        let water = fs::read_to_string(config.output_path("ternary_casi_water.svg")).unwrap();
        assert!(water.contains("Particle-size fractions by CASI (water)"));
        let boxes = fs::read_to_string(config.output_path("boxplot_water.svg")).unwrap();
        assert!(boxes.contains("extremes removed"));
        // site map, 3 per dispersion, site effects
        assert_eq!(figures.len(), 8);
    }

    #[test]
    fn test_missing_input_file() {
        let dir = TempDir::new().unwrap();
        let config = WorkflowConfig {
            data_dir: dir.path().join("absent"),
            output_dir: dir.path().join("out"),
            ..Default::default()
        };
        assert!(derive_only(&config).is_err());
    }

    #[test]
    fn test_invalid_config_rejected_before_io() {
        let dir = TempDir::new().unwrap();
        let config = WorkflowConfig {
            quantiles: [0.5, 0.5],
            output_dir: dir.path().join("out"),
            ..Default::default()
        };
        assert!(run(&config).is_err());
        assert!(!config.output_dir.exists());
    }
}
