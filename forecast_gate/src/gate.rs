//! CI gate: does the selected model beat the reference floor?

use crate::error::{ForecastError, Result};
use crate::evaluation::ModelMetrics;
use gate_math::round_to;
use serde::{Deserialize, Serialize};

/// Decision of the CI gate for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiGateDecision {
    /// Best rounded score among the reference models
    pub ci_floor: f64,
    /// Model with the lowest rounded score
    pub selected_model: String,
    /// Whether the selected model's score is at or below the floor
    pub pass_ci: bool,
}

/// Select the best model and compare it with the reference floor
///
/// Scores are compared after rounding to `decimals`, the precision at which
/// they are persisted. Ties go to the model evaluated first.
pub fn ci_gate(
    metrics: &ModelMetrics,
    reference_models: &[String],
    decimals: u32,
) -> Result<CiGateDecision> {
    let rounded: Vec<(&str, f64)> = metrics
        .scores()
        .iter()
        .map(|s| (s.model.as_str(), round_to(s.score, decimals)))
        .collect();

    let ci_floor = rounded
        .iter()
        .filter(|(model, _)| reference_models.iter().any(|r| r == model))
        .map(|&(_, score)| score)
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.min(s))))
        .ok_or_else(|| ForecastError::MissingReferenceModel {
            expected: reference_models.to_vec(),
        })?;

    let (selected_model, selected_score) = rounded
        .iter()
        .fold(None, |best: Option<(&str, f64)>, &(model, score)| match best {
            Some((_, b)) if b <= score => best,
            _ => Some((model, score)),
        })
        .ok_or_else(|| ForecastError::ValidationError("No model metrics to gate".to_string()))?;

    Ok(CiGateDecision {
        ci_floor,
        selected_model: selected_model.to_string(),
        pass_ci: selected_score <= ci_floor,
    })
}
