//! Re-check a persisted run against fresh actuals

use crate::artifacts::{read_json, write_json, AUDIT_LOG, BASELINE_FORECASTS, BASELINE_METRICS, CI_RESULTS};
use crate::audit::verify_ledger;
use crate::data::Observation;
use crate::error::{ForecastError, Result};
use crate::evaluation::{evaluate_forecasts, MetricSummary};
use crate::forecast::ForecastTable;
use chrono::{DateTime, Utc};
use gate_math::round_to;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// The part of `baseline_metrics.json` needed to re-score a run
#[derive(Debug, Deserialize)]
struct RecordedRun {
    series_id: String,
    metrics: BTreeMap<String, MetricSummary>,
}

/// Contents of `ci_results.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiRecheck {
    pub series_id: String,
    pub timestamp: DateTime<Utc>,
    /// Every recorded model's score moved by less than the tolerance
    pub passed: bool,
    /// Ledger verification result, `None` when the run was never sealed
    pub ledger_verified: Option<bool>,
    /// Current minus recorded score per model, rounded to 4 decimals
    pub score_drift: BTreeMap<String, f64>,
}

/// Re-evaluate the forecasts stored in `run_dir` and compare the scores
/// with the ones recorded at run time
///
/// Writes `ci_results.json` into `run_dir`.
pub fn rerun_ci_check<P: AsRef<Path>>(
    run_dir: P,
    actuals: &[Observation],
    tolerance: f64,
) -> Result<CiRecheck> {
    let run_dir = run_dir.as_ref();
    if !(tolerance > 0.0) {
        return Err(ForecastError::InvalidParameter(format!(
            "tolerance must be positive, got {tolerance}"
        )));
    }

    let recorded: RecordedRun = read_json(run_dir.join(BASELINE_METRICS))?;
    let forecasts = ForecastTable::read_csv(run_dir.join(BASELINE_FORECASTS))?;

    let models: Vec<String> = forecasts
        .models()
        .iter()
        .filter(|m| recorded.metrics.contains_key(*m))
        .cloned()
        .collect();
    if models.is_empty() {
        return Err(ForecastError::ValidationError(
            "No recorded model found in the stored forecasts".to_string(),
        ));
    }

    let evaluation = evaluate_forecasts(&forecasts, actuals, &models)?;
    let score_drift: BTreeMap<String, f64> = evaluation
        .metrics
        .scores()
        .iter()
        .filter_map(|s| {
            recorded
                .metrics
                .get(&s.model)
                .map(|r| (s.model.clone(), round_to(s.score - r.score, 4)))
        })
        .collect();

    let ledger_path = run_dir.join(AUDIT_LOG);
    let ledger_verified = if ledger_path.exists() {
        Some(verify_ledger(&ledger_path, run_dir)?.is_empty())
    } else {
        None
    };

    let passed = score_drift.values().all(|d| d.abs() < tolerance);
    let result = CiRecheck {
        series_id: recorded.series_id,
        timestamp: Utc::now(),
        passed,
        ledger_verified,
        score_drift,
    };
    write_json(run_dir.join(CI_RESULTS), &result)?;

    if passed {
        info!(run_dir = %run_dir.display(), "CI re-check passed");
    } else {
        warn!(run_dir = %run_dir.display(), drift = ?result.score_drift, "CI re-check found score drift");
    }
    Ok(result)
}
