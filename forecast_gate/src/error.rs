//! Error types for the forecast_gate crate

use std::path::PathBuf;
use thiserror::Error;

/// Custom error types for the forecast_gate crate
///
/// Variants from `MissingParentArtifact` to `DriftGateFailed` are fatal gate
/// failures: the run must stop and the message names the rule that was
/// violated.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// A model has no forecast row that joins to an actual value
    #[error("Missing join key: model '{model}' has no forecast rows matching the actuals")]
    MissingJoinKey { model: String },

    /// Cascade check 1/4: parent metrics artifact is absent
    #[error("Cascade check 1/4 failed: missing parent artifact {}", .path.display())]
    MissingParentArtifact { path: PathBuf },

    /// Cascade check 2/4: parent run did not pass its CI gate
    #[error("Cascade check 2/4 failed: upstream CI failed in {} (selected model {selected_model:?}). Cascade blocked.", .parent.display())]
    UpstreamCiFailed {
        parent: PathBuf,
        selected_model: Option<String>,
    },

    /// Cascade check 3/4: parent run recorded drift that was never resolved
    #[error("Cascade check 3/4 failed: unresolved drift in parent run {} (p-value {p_value:?}). Cascade blocked.", .parent.display())]
    UnresolvedUpstreamDrift {
        parent: PathBuf,
        p_value: Option<f64>,
    },

    /// Cascade check 4/4: parent forecasts needed as anchor are absent
    #[error("Cascade check 4/4 failed: missing anchor forecasts {}", .path.display())]
    MissingAnchorForecasts { path: PathBuf },

    /// Strict anchor join found an atomic row without a matching anchor row
    #[error("Missing anchor value for model '{model}' at series '{series_id}', {ds}")]
    MissingAnchorValue {
        model: String,
        series_id: String,
        ds: String,
    },

    /// Hard CI gate: residual drift detected at an enforcing phase
    #[error("Drift detected for model '{model}' (p-value {p_value}). CI gate failed, retraining required.")]
    DriftGateFailed { model: String, p_value: f64 },

    /// None of the CI reference models are present in the metrics
    #[error("No CI reference model found among metrics (expected one of {expected:?})")]
    MissingReferenceModel { expected: Vec<String> },

    /// Error related to data validation or processing
    #[error("Data error: {0}")]
    DataError(String),

    /// Error related to parameter validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error reported by an experiment tracking backend
    #[error("Tracking error: {0}")]
    Tracking(String),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from JSON (de)serialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error from CSV reading or writing
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Error parsing a TOML configuration
    #[error("Config error: {0}")]
    ConfigError(#[from] toml::de::Error),

    /// Error from the statistics layer
    #[error("Math error: {0}")]
    MathError(#[from] gate_math::MathError),
}

impl ForecastError {
    /// Whether this error is a fatal precondition or hard CI gate failure
    ///
    /// Fatal failures are never retried; the caller has to fix or re-run the
    /// offending (parent) run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ForecastError::MissingParentArtifact { .. }
                | ForecastError::UpstreamCiFailed { .. }
                | ForecastError::UnresolvedUpstreamDrift { .. }
                | ForecastError::MissingAnchorForecasts { .. }
                | ForecastError::MissingAnchorValue { .. }
                | ForecastError::DriftGateFailed { .. }
        )
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;
