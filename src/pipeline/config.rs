//! Workflow configuration.
//!
//! Every stage receives the configuration by reference; paths are explicit
//! and nothing depends on the process working directory.

use crate::data::{MixedModelSpec, ModelSpec};
use crate::error::{CasiError, Result};
use crate::extreme::PredictionScale;
use crate::fetch::ArchiveSource;
use crate::model::{LmmConfig, QuantileConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration of a CASI workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Directory holding the input tables.
    pub data_dir: PathBuf,
    /// Measurement table, relative to `data_dir`.
    pub measurements_file: String,
    /// Covariate table, relative to `data_dir`.
    pub covariates_file: String,
    /// Directory receiving tables, model artifacts, figures and the report.
    pub output_dir: PathBuf,
    /// Remote archive holding both input tables.
    pub archive: ArchiveSource,
    /// Dispersion treatments kept for analysis.
    pub dispersions: Vec<String>,
    /// Treatment code of the reference (untreated) condition.
    pub reference_treatment: String,
    /// Lower and upper quantile levels of the extreme-value bounds.
    pub quantiles: [f64; 2],
    /// Scale on which quantile predictions are compared with CASI.
    pub prediction_scale: PredictionScale,
    /// Dispersion treatments whose boxplot leaves out extreme rows.
    pub boxplot_exclude_extremes: Vec<String>,
    /// Quantile-bound model.
    pub extreme_model: ModelSpec,
    /// Multilevel site model.
    pub site_model: MixedModelSpec,
    /// Quantile regression solver settings.
    pub quantile: QuantileConfig,
    /// Mixed model solver settings.
    pub lmm: LmmConfig,
    /// Render SVG figures and the HTML report.
    pub figures: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            measurements_file: "ldpsa.csv".to_string(),
            covariates_file: "covariates.csv".to_string(),
            output_dir: PathBuf::from("output"),
            archive: ArchiveSource::new(""),
            dispersions: vec!["water".to_string(), "calgon".to_string()],
            reference_treatment: "c4".to_string(),
            quantiles: [0.05, 0.95],
            prediction_scale: PredictionScale::Exponentiated,
            boxplot_exclude_extremes: vec!["water".to_string()],
            extreme_model: ModelSpec::extreme_bounds(),
            site_model: MixedModelSpec::site_model(),
            quantile: QuantileConfig::default(),
            lmm: LmmConfig::default(),
            figures: true,
        }
    }
}

impl WorkflowConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(CasiError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(CasiError::from)
    }

    /// Load and validate a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the measurement table.
    pub fn measurements_path(&self) -> PathBuf {
        self.data_dir.join(&self.measurements_file)
    }

    /// Path of the covariate table.
    pub fn covariates_path(&self) -> PathBuf {
        self.data_dir.join(&self.covariates_file)
    }

    /// Path of an output artifact.
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    /// Check parameter ranges and model consistency.
    pub fn validate(&self) -> Result<()> {
        if self.dispersions.is_empty() {
            return Err(CasiError::InvalidParameter(
                "at least one dispersion treatment is required".to_string(),
            ));
        }
        if self.reference_treatment.trim().is_empty() {
            return Err(CasiError::InvalidParameter(
                "reference_treatment is empty".to_string(),
            ));
        }

        let [lo, hi] = self.quantiles;
        if !(lo > 0.0 && lo < hi && hi < 1.0) {
            return Err(CasiError::InvalidParameter(format!(
                "quantiles must satisfy 0 < lower < upper < 1, got [{}, {}]",
                lo, hi
            )));
        }

        for (name, spec) in [
            ("extreme_model", &self.extreme_model),
            ("site_model.fixed", &self.site_model.fixed),
        ] {
            if spec.response != "casi" {
                return Err(CasiError::InvalidParameter(format!(
                    "{} must model 'casi', not '{}'",
                    name, spec.response
                )));
            }
        }
        if self.site_model.random.levels.is_empty() {
            return Err(CasiError::InvalidParameter(
                "site_model.random needs at least one grouping level".to_string(),
            ));
        }

        if self.quantile.max_iter == 0 || self.lmm.max_iter == 0 {
            return Err(CasiError::InvalidParameter(
                "solver max_iter must be positive".to_string(),
            ));
        }
        if !(self.quantile.epsilon > 0.0) {
            return Err(CasiError::InvalidParameter(
                "quantile.epsilon must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = WorkflowConfig::default();
        config.validate().unwrap();
        assert_eq!(config.measurements_path(), PathBuf::from("data/ldpsa.csv"));
        assert_eq!(config.reference_treatment, "c4");
        assert_eq!(config.quantiles, [0.05, 0.95]);
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = WorkflowConfig::default();
        config.archive.file_id = "1AbC".to_string();
        config.prediction_scale = PredictionScale::Linear;

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("prediction_scale: linear"));
        let parsed = WorkflowConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "output_dir: results\nquantiles: [0.1, 0.9]\n";
        let config = WorkflowConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("results"));
        assert_eq!(config.quantiles, [0.1, 0.9]);
        assert_eq!(config.dispersions, vec!["water", "calgon"]);
        assert_eq!(config.extreme_model, ModelSpec::extreme_bounds());
    }

    #[test]
    fn test_validate_rejects_bad_quantiles() {
        let config = WorkflowConfig {
            quantiles: [0.9, 0.1],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_other_response() {
        let config = WorkflowConfig {
            extreme_model: ModelSpec::new("sand"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
