//! Cascade consistency between aggregation levels
//!
//! A finer-grained (child) run may only start once its coarser parent passed
//! validation. The parent's directory is only ever read here.

use crate::artifacts::{read_json, BASELINE_FORECASTS, BASELINE_METRICS};
use crate::data::format_timestamp;
use crate::drift::DriftReport;
use crate::error::{ForecastError, Result};
use crate::forecast::ForecastTable;
use crate::gate::CiGateDecision;
use gate_math::{mean, round_to};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Parent drift block; absent fields mean no drift was recorded
#[derive(Debug, Clone, Default, Deserialize)]
struct ParentDrift {
    #[serde(default)]
    drift_detected: bool,
    #[serde(default)]
    p_value: Option<f64>,
}

impl ParentDrift {
    fn report(&self) -> DriftReport {
        DriftReport {
            drift_detected: self.drift_detected,
            p_value: self.p_value.unwrap_or(1.0),
        }
    }
}

/// The part of a parent's `baseline_metrics.json` the cascade depends on
///
/// Read leniently: a missing `pass_ci` counts as a failed gate.
#[derive(Debug, Clone, Deserialize)]
struct ParentOutcome {
    #[serde(default)]
    pass_ci: bool,
    #[serde(default)]
    ci_floor: Option<f64>,
    #[serde(default)]
    selected_model: Option<String>,
    #[serde(default)]
    drift_monitor: Option<ParentDrift>,
}

/// CI gate outcome recorded by a parent run
///
/// Older or hand-written parents may omit the floor or the selected model.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentGate {
    pub pass_ci: bool,
    pub ci_floor: Option<f64>,
    pub selected_model: Option<String>,
}

impl ParentGate {
    /// The full gate decision, when the parent recorded every field
    pub fn decision(&self) -> Option<CiGateDecision> {
        Some(CiGateDecision {
            ci_floor: self.ci_floor?,
            selected_model: self.selected_model.clone()?,
            pass_ci: self.pass_ci,
        })
    }
}

/// Read-only view of a validated parent run
#[derive(Debug, Clone)]
pub struct CascadeContext {
    parent_dir: PathBuf,
    gate: ParentGate,
    drift: Option<DriftReport>,
}

impl CascadeContext {
    /// Directory of the parent run
    pub fn parent_dir(&self) -> &Path {
        &self.parent_dir
    }

    /// CI gate outcome of the parent run
    pub fn parent_gate(&self) -> &ParentGate {
        &self.gate
    }

    /// Drift report of the parent run, `None` when it never monitored drift
    pub fn parent_drift(&self) -> Option<&DriftReport> {
        self.drift.as_ref()
    }

    /// Model the parent run selected, when recorded
    pub fn parent_selected_model(&self) -> Option<&str> {
        self.gate.selected_model.as_deref()
    }

    /// Path of the parent's forecast table
    pub fn anchor_forecasts_path(&self) -> PathBuf {
        self.parent_dir.join(BASELINE_FORECASTS)
    }

    /// Load the parent's forecasts used as anchor
    pub fn load_anchor_forecasts(&self) -> Result<ForecastTable> {
        let path = self.anchor_forecasts_path();
        if !path.exists() {
            return Err(ForecastError::MissingAnchorForecasts { path });
        }
        ForecastTable::read_csv(path)
    }
}

/// Run the four cascade checks against a parent run directory
///
/// 1. `baseline_metrics.json` exists
/// 2. the parent passed its CI gate
/// 3. the parent recorded no drift
/// 4. `baseline_forecasts.csv` exists
///
/// Every failure is fatal.
pub fn enforce_cascade<P: AsRef<Path>>(parent_dir: P) -> Result<CascadeContext> {
    let parent_dir = parent_dir.as_ref().to_path_buf();

    let metrics_path = parent_dir.join(BASELINE_METRICS);
    if !metrics_path.exists() {
        return Err(ForecastError::MissingParentArtifact { path: metrics_path });
    }
    let outcome: ParentOutcome = read_json(&metrics_path)?;

    if !outcome.pass_ci {
        return Err(ForecastError::UpstreamCiFailed {
            parent: parent_dir,
            selected_model: outcome.selected_model,
        });
    }

    if let Some(drift) = outcome.drift_monitor.as_ref().filter(|d| d.drift_detected) {
        return Err(ForecastError::UnresolvedUpstreamDrift {
            parent: parent_dir,
            p_value: drift.p_value,
        });
    }
    let drift = outcome.drift_monitor.as_ref().map(ParentDrift::report);

    let forecasts_path = parent_dir.join(BASELINE_FORECASTS);
    if !forecasts_path.exists() {
        return Err(ForecastError::MissingAnchorForecasts {
            path: forecasts_path,
        });
    }

    info!(parent = %parent_dir.display(), "Cascade checks passed");
    Ok(CascadeContext {
        parent_dir,
        gate: ParentGate {
            pass_ci: outcome.pass_ci,
            ci_floor: outcome.ci_floor,
            selected_model: outcome.selected_model,
        },
        drift,
    })
}

/// Per-row `atomic - anchor` for one model, joined on (series, timestamp)
///
/// The join is strict: an atomic prediction without an anchor prediction at
/// the same key fails with `MissingAnchorValue`. Rows where the atomic
/// prediction itself is missing are skipped.
pub fn compute_anchor_bias(
    atomic: &ForecastTable,
    anchor: &ForecastTable,
    model: &str,
) -> Result<Vec<f64>> {
    let anchor_index = anchor.lookup(model)?;

    let mut bias = Vec::new();
    for (row, value) in atomic.column(model)? {
        let Some(value) = value else {
            continue;
        };
        match anchor_index.get(&row.key()).copied().flatten() {
            Some(anchor_value) => bias.push(value - anchor_value),
            None => {
                return Err(ForecastError::MissingAnchorValue {
                    model: model.to_string(),
                    series_id: row.unique_id.clone(),
                    ds: format_timestamp(&row.ds),
                })
            }
        }
    }
    Ok(bias)
}

/// Mean anchor bias rounded to 4 decimals, as persisted with the run
pub fn anchor_bias_mean(bias: &[f64]) -> Result<f64> {
    Ok(round_to(mean(bias)?, 4))
}
