//! Error types for the ldpsa-casi library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum CasiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing column '{column}' in {table}")]
    MissingColumn { column: String, table: String },

    #[error("Invalid value '{value}' at row {row}, column '{column}'")]
    InvalidValue {
        value: String,
        row: usize,
        column: String,
    },

    #[error("Non-positive fractions break the log-ratio transform: {}", .0.join("; "))]
    NonPositiveFraction(Vec<String>),

    #[error("ssid '{0}' has more than one reference row")]
    DuplicateReference(String),

    #[error("ssid '{0}' has more than one covariate row")]
    DuplicateCovariates(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("{model} did not converge after {iterations} iterations")]
    Convergence { model: String, iterations: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Figure error: {0}")]
    Figure(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, CasiError>;
