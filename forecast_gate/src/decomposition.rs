//! Break residual error into interpretable components

use crate::error::Result;
use crate::evaluation::ResidualTable;
use gate_math::{mean, population_variance, round_to};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Lag used to measure missed weekly seasonality
pub const SEASONAL_LAG: usize = 7;

/// Error components of one model, each rounded to 4 decimals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorComponents {
    /// Mean residual
    #[serde(rename = "Bias Error")]
    pub bias_error: f64,
    /// Population variance of residuals
    #[serde(rename = "Variance Error")]
    pub variance_error: f64,
    /// Mean absolute deviation from the bias
    #[serde(rename = "Noise")]
    pub noise: f64,
    /// Mean absolute lag-7 difference; `None` with 7 or fewer residuals
    #[serde(rename = "Seasonality Miss")]
    pub seasonality_miss: Option<f64>,
    /// Mean offset from the parent forecast, set for cascaded runs
    #[serde(rename = "Anchor Bias", skip_serializing_if = "Option::is_none", default)]
    pub anchor_bias: Option<f64>,
}

/// Error components per model, as written to `error_breakdown.json`
pub type ErrorBreakdown = BTreeMap<String, ErrorComponents>;

/// Decompose the residuals of a single model
pub fn decompose_series(residuals: &[f64]) -> Result<ErrorComponents> {
    let bias_error = mean(residuals)?;
    let variance_error = population_variance(residuals)?;
    let noise = mean(
        &residuals
            .iter()
            .map(|r| (r - bias_error).abs())
            .collect::<Vec<_>>(),
    )?;

    let lagged: Vec<f64> = residuals
        .iter()
        .skip(SEASONAL_LAG)
        .zip(residuals)
        .map(|(now, before)| (now - before).abs())
        .collect();
    let seasonality_miss = if lagged.is_empty() {
        None
    } else {
        Some(round_to(mean(&lagged)?, 4))
    };

    Ok(ErrorComponents {
        bias_error: round_to(bias_error, 4),
        variance_error: round_to(variance_error, 4),
        noise: round_to(noise, 4),
        seasonality_miss,
        anchor_bias: None,
    })
}

/// Decompose the residuals of every listed model
///
/// Models whose residuals are all missing are left out of the breakdown.
pub fn decompose_errors(residuals: &ResidualTable, models: &[String]) -> Result<ErrorBreakdown> {
    let mut breakdown = ErrorBreakdown::new();
    for model in models {
        let values = residuals.values(model)?;
        if values.is_empty() {
            warn!(model = %model, "no residuals to decompose");
            continue;
        }
        breakdown.insert(model.clone(), decompose_series(&values)?);
    }
    Ok(breakdown)
}
