//! Paired significance test between two forecast columns

use crate::data::{Observation, SeriesKey};
use crate::error::{ForecastError, Result};
use crate::forecast::ForecastTable;
use gate_math::{paired_t_test, round_to};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Result of comparing a model's absolute errors with a comparator's
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// Comparator model name
    pub vs: String,
    /// Paired t statistic, rounded to 3 decimals
    pub dm_stat: f64,
    /// Two-sided p-value, rounded to 3 decimals
    pub p_value: f64,
}

/// Paired t-test on the absolute errors of two aligned forecast columns
///
/// A positive statistic means the first forecast has larger errors.
pub fn compare_errors(
    first: &[f64],
    second: &[f64],
    actual: &[f64],
    against: &str,
) -> Result<SignificanceResult> {
    if first.len() != actual.len() || second.len() != actual.len() {
        return Err(ForecastError::ValidationError(format!(
            "Forecast columns ({}, {}) and actuals ({}) must align",
            first.len(),
            second.len(),
            actual.len()
        )));
    }

    let abs_errors = |forecast: &[f64]| -> Vec<f64> {
        forecast.iter().zip(actual).map(|(f, y)| (f - y).abs()).collect()
    };
    let outcome = paired_t_test(&abs_errors(first), &abs_errors(second))?;

    Ok(SignificanceResult {
        vs: against.to_string(),
        dm_stat: round_to(outcome.statistic, 3),
        p_value: round_to(outcome.p_value, 3),
    })
}

/// Compare `model` against `against`, aligning both with the actuals by key
///
/// Rows where either forecast or the actual is missing are skipped.
pub fn significance_test(
    forecasts: &ForecastTable,
    actuals: &[Observation],
    model: &str,
    against: &str,
) -> Result<SignificanceResult> {
    let truth: HashMap<SeriesKey, f64> = actuals.iter().map(|obs| (obs.key(), obs.y)).collect();
    let (a, b) = (forecasts.model_index(model)?, forecasts.model_index(against)?);

    let mut first = Vec::new();
    let mut second = Vec::new();
    let mut actual = Vec::new();
    for row in forecasts.rows() {
        if let (Some(f1), Some(f2), Some(y)) = (row.values[a], row.values[b], truth.get(&row.key())) {
            first.push(f1);
            second.push(f2);
            actual.push(*y);
        }
    }

    compare_errors(&first, &second, &actual, against)
}
