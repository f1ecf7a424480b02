//! Gate configuration
//!
//! Every constant the gates depend on lives here with its default, so a run
//! can be tuned from a TOML file without touching code:
//!
//! ```toml
//! drift_window = 21
//! reference_models = ["ensemble_naive", "HoltWinters"]
//!
//! [phase_thresholds]
//! drift_hard_gate = 3
//! ```

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Phase at which every optional feature switches on by default
pub const DEFAULT_ADVANCED_PHASE: u32 = 2;

/// Minimum phase at which each optional feature is active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseThresholds {
    pub significance_test: u32,
    pub drift_monitor: u32,
    pub serve_hash: u32,
    pub drift_hard_gate: u32,
    pub error_breakdown: u32,
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self {
            significance_test: DEFAULT_ADVANCED_PHASE,
            drift_monitor: DEFAULT_ADVANCED_PHASE,
            serve_hash: DEFAULT_ADVANCED_PHASE,
            drift_hard_gate: DEFAULT_ADVANCED_PHASE,
            error_breakdown: DEFAULT_ADVANCED_PHASE,
        }
    }
}

/// Tunable parameters of the validation gates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Number of most recent residuals compared against history
    pub drift_window: usize,
    /// Significance level below which drift is reported
    pub drift_alpha: f64,
    /// Activation phase per optional feature
    pub phase_thresholds: PhaseThresholds,
    /// Models whose best score forms the CI floor
    pub reference_models: Vec<String>,
    /// Comparator for the significance test
    pub baseline_model: String,
    /// Largest tolerated score change when re-checking a persisted run
    pub score_drift_tolerance: f64,
    /// Read buffer size used when hashing artifacts
    pub hash_chunk_size: usize,
    /// Decimal places kept for persisted metrics
    pub metric_decimals: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            drift_window: 14,
            drift_alpha: 0.05,
            phase_thresholds: PhaseThresholds::default(),
            reference_models: vec!["ensemble_naive".to_string(), "HoltWinters".to_string()],
            baseline_model: "ensemble_naive".to_string(),
            score_drift_tolerance: 0.1,
            hash_chunk_size: 8192,
            metric_decimals: 2,
        }
    }
}

impl GateConfig {
    /// Parse a configuration from TOML text; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: GateConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check that the configuration can drive a run
    pub fn validate(&self) -> Result<()> {
        if self.drift_window == 0 {
            return Err(ForecastError::InvalidParameter(
                "drift_window must be positive".to_string(),
            ));
        }
        if !(self.drift_alpha > 0.0 && self.drift_alpha < 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "drift_alpha must lie in (0, 1), got {}",
                self.drift_alpha
            )));
        }
        if self.hash_chunk_size == 0 {
            return Err(ForecastError::InvalidParameter(
                "hash_chunk_size must be positive".to_string(),
            ));
        }
        if self.reference_models.is_empty() {
            return Err(ForecastError::InvalidParameter(
                "reference_models must name at least one model".to_string(),
            ));
        }
        Ok(())
    }

    /// Human readable description of the CI floor rule
    pub fn ci_baseline_rule(&self) -> String {
        format!("min({})", self.reference_models.join(", "))
    }
}
