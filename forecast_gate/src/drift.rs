//! Residual drift detection

use crate::error::{ForecastError, Result};
use crate::evaluation::ResidualTable;
use gate_math::{ks_two_sample, round_to};
use serde::{Deserialize, Serialize};

/// Outcome of comparing recent residuals against their history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Whether the recent window differs significantly from the past
    pub drift_detected: bool,
    /// KS p-value, rounded to 4 decimals
    pub p_value: f64,
}

impl DriftReport {
    /// Report used when history is too short to judge
    pub fn insufficient_history() -> Self {
        Self {
            drift_detected: false,
            p_value: 1.0,
        }
    }
}

/// Detect drift in one model's residuals
///
/// Residuals are ordered by timestamp (stable across series) and missing
/// values are dropped before the window split.
pub fn detect_drift(
    residuals: &ResidualTable,
    model: &str,
    window: usize,
    alpha: f64,
) -> Result<DriftReport> {
    let mut series = residuals.series(model)?;
    series.sort_by_key(|(ds, _)| *ds);
    let values: Vec<f64> = series.into_iter().map(|(_, v)| v).collect();

    detect_drift_in(&values, window, alpha)
}

/// Detect drift in a time-ordered residual sequence
///
/// The last `window` values are tested against everything before them with
/// a two-sample KS test. Fewer than `window` past values is never drift.
pub fn detect_drift_in(values: &[f64], window: usize, alpha: f64) -> Result<DriftReport> {
    if window == 0 {
        return Err(ForecastError::InvalidParameter(
            "Drift window must be positive".to_string(),
        ));
    }

    let split = values.len().saturating_sub(window);
    let (past, recent) = values.split_at(split);
    if past.len() < window {
        return Ok(DriftReport::insufficient_history());
    }

    let outcome = ks_two_sample(past, recent)?;
    Ok(DriftReport {
        drift_detected: outcome.p_value < alpha,
        p_value: round_to(outcome.p_value, 4),
    })
}
