//! Staged gate run
//!
//! A run moves through `Pending -> Evaluated -> Analyzed -> Persisted ->
//! Sealed`. Every transition consumes the previous stage, and the audit
//! ledger can only be written from [`Persisted`], so no artifact can be
//! produced after the run has been sealed.
//!
//! ```no_run
//! use forecast_gate::artifacts::ForecastRun;
//! use forecast_gate::config::GateConfig;
//! use forecast_gate::data::{split_holdout, DataLoader};
//! use forecast_gate::forecast::{add_ensemble_naive, forecast_all, Naive, SeasonalNaive};
//! use forecast_gate::pipeline::GateRun;
//! use forecast_gate::tracking::NoopTracker;
//!
//! # fn main() -> forecast_gate::Result<()> {
//! let observations = DataLoader::from_csv("sales.csv")?;
//! let (history, actuals) = split_holdout(&observations, 7)?;
//!
//! let seasonal = SeasonalNaive::new(7)?;
//! let mut forecasts = forecast_all(&[&Naive, &seasonal], &history, 7)?;
//! add_ensemble_naive(&mut forecasts, "Naive", "SeasonalNaive")?;
//!
//! let run = ForecastRun::new("run-001", "store_1", 7, 2, "outputs/run-001");
//! let sealed = GateRun::new(run, GateConfig::default(), forecasts, actuals)
//!     .with_history(history)
//!     .evaluate()?
//!     .analyze()?
//!     .persist(&mut NoopTracker)?
//!     .seal()?;
//!
//! println!("selected {}", sealed.baseline().selected_model);
//! # Ok(())
//! # }
//! ```

use crate::artifacts::{
    write_error_breakdown, write_json, BaselineMetrics, DriftMonitor, ForecastRun, RunInfo,
    RunMetadata, BASELINE_FORECASTS, BASELINE_METRICS, ERROR_BREAKDOWN, FORECASTABILITY, RUN_INFO,
};
use crate::audit::{compute_digest, serve_hash, verify_ledger_with_chunk, write_ledger, Mismatch};
use crate::cascade::{anchor_bias_mean, compute_anchor_bias, CascadeContext};
use crate::config::GateConfig;
use crate::data::Observation;
use crate::decomposition::{decompose_errors, ErrorBreakdown};
use crate::drift::detect_drift;
use crate::error::{ForecastError, Result};
use crate::evaluation::{evaluate_forecasts, Evaluation};
use crate::forecast::ForecastTable;
use crate::forecastability::{forecastability, Forecastability};
use crate::gate::{ci_gate, CiGateDecision};
use crate::phase::{is_enabled, Feature};
use crate::significance::{significance_test, SignificanceResult};
use crate::tracking::{commit_hash, track_best_effort, ExperimentTracker, TrackingRecord};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Inputs gathered, nothing computed yet
#[derive(Debug)]
pub struct Pending {
    forecasts: ForecastTable,
    actuals: Vec<Observation>,
    history: Vec<Observation>,
}

/// Metrics, residuals and the CI decision are known
#[derive(Debug)]
pub struct Evaluated {
    forecasts: ForecastTable,
    actuals: Vec<Observation>,
    history: Vec<Observation>,
    evaluation: Evaluation,
    decision: CiGateDecision,
}

/// Every report of the run is assembled in memory
#[derive(Debug)]
pub struct Analyzed {
    forecasts: ForecastTable,
    evaluation: Evaluation,
    baseline: BaselineMetrics,
    breakdown: Option<ErrorBreakdown>,
}

/// Artifacts are on disk, the ledger is not
#[derive(Debug)]
pub struct Persisted {
    baseline: BaselineMetrics,
    ledger_inputs: Vec<PathBuf>,
}

/// Ledger written and verified
#[derive(Debug)]
pub struct Sealed {
    baseline: BaselineMetrics,
    ledger_path: PathBuf,
    mismatches: BTreeMap<String, Mismatch>,
}

/// One gate run in stage `S`
#[derive(Debug)]
pub struct GateRun<S> {
    run: ForecastRun,
    config: GateConfig,
    cascade: Option<CascadeContext>,
    stage: S,
}

impl<S> GateRun<S> {
    /// Identity of the run
    pub fn run(&self) -> &ForecastRun {
        &self.run
    }

    /// Configuration driving the gates
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    fn enabled(&self, feature: Feature) -> bool {
        is_enabled(feature, self.run.phase, &self.config.phase_thresholds)
    }
}

impl GateRun<Pending> {
    /// Start a run over precomputed forecasts and the held-out actuals
    pub fn new(
        run: ForecastRun,
        config: GateConfig,
        forecasts: ForecastTable,
        actuals: Vec<Observation>,
    ) -> Self {
        Self {
            run,
            config,
            cascade: None,
            stage: Pending {
                forecasts,
                actuals,
                history: Vec::new(),
            },
        }
    }

    /// Training history, used for the forecastability profile
    pub fn with_history(mut self, history: Vec<Observation>) -> Self {
        self.stage.history = history;
        self
    }

    /// Parent run that already passed [`crate::cascade::enforce_cascade`]
    pub fn with_cascade(mut self, cascade: CascadeContext) -> Self {
        self.cascade = Some(cascade);
        self
    }

    /// Score every model column and apply the CI gate
    pub fn evaluate(self) -> Result<GateRun<Evaluated>> {
        self.config.validate()?;
        if self.stage.forecasts.is_empty() {
            return Err(ForecastError::DataError(
                "Forecast table has no rows".to_string(),
            ));
        }

        let models = self.stage.forecasts.models().to_vec();
        let evaluation = evaluate_forecasts(&self.stage.forecasts, &self.stage.actuals, &models)?;
        let decision = ci_gate(
            &evaluation.metrics,
            &self.config.reference_models,
            self.config.metric_decimals,
        )?;

        info!(
            run_id = %self.run.run_id,
            selected_model = %decision.selected_model,
            ci_floor = decision.ci_floor,
            pass_ci = decision.pass_ci,
            "Forecasts evaluated"
        );

        let Pending {
            forecasts,
            actuals,
            history,
        } = self.stage;
        let stage = Evaluated {
            forecasts,
            actuals,
            history,
            evaluation,
            decision,
        };
        Ok(GateRun {
            run: self.run,
            config: self.config,
            cascade: self.cascade,
            stage,
        })
    }
}

impl GateRun<Evaluated> {
    pub fn evaluation(&self) -> &Evaluation {
        &self.stage.evaluation
    }

    pub fn decision(&self) -> &CiGateDecision {
        &self.stage.decision
    }

    /// Run the phase-gated analyses and assemble `baseline_metrics`
    ///
    /// Fails with [`ForecastError::DriftGateFailed`] when drift is detected
    /// at a phase where the drift gate is enforced.
    pub fn analyze(self) -> Result<GateRun<Analyzed>> {
        let selected = self.stage.decision.selected_model.clone();
        let summary = self.stage.evaluation.metrics.summary(self.config.metric_decimals);

        let profile = self.profile_forecastability();
        let dm_test = if self.enabled(Feature::SignificanceTest) {
            self.compare_with_baseline(&selected)
        } else {
            None
        };

        let monitor_on = self.enabled(Feature::DriftMonitor);
        let hard_gate_on = self.enabled(Feature::DriftHardGate);
        let drift_monitor = if monitor_on || hard_gate_on {
            let report = detect_drift(
                &self.stage.evaluation.residuals,
                &selected,
                self.config.drift_window,
                self.config.drift_alpha,
            )?;
            if report.drift_detected {
                if hard_gate_on {
                    return Err(ForecastError::DriftGateFailed {
                        model: selected,
                        p_value: report.p_value,
                    });
                }
                warn!(model = %selected, p_value = report.p_value, "Residual drift detected (advisory)");
            }
            monitor_on.then(|| DriftMonitor {
                last_trained: self.run.timestamp.date_naive(),
                report,
            })
        } else {
            None
        };

        let mut anchor_bias = None;
        let breakdown = if self.enabled(Feature::ErrorBreakdown) {
            let models = self.stage.forecasts.models().to_vec();
            let mut breakdown = decompose_errors(&self.stage.evaluation.residuals, &models)?;
            if let Some(cascade) = &self.cascade {
                let anchor = cascade.load_anchor_forecasts()?;
                let bias = compute_anchor_bias(&self.stage.forecasts, &anchor, &selected)?;
                let value = anchor_bias_mean(&bias)?;
                if let Some(components) = breakdown.get_mut(&selected) {
                    components.anchor_bias = Some(value);
                }
                info!(model = %selected, anchor_bias = value, "Anchor bias against parent run");
                anchor_bias = Some(value);
            }
            Some(breakdown)
        } else {
            None
        };

        let serve = match summary.get(&selected) {
            Some(metrics) if self.enabled(Feature::ServeHash) => Some(serve_hash(
                &self.run.series_id,
                &selected,
                metrics,
                &self.run.timestamp,
                self.run.phase,
            )?),
            _ => None,
        };

        let input_hash = match &self.run.input_file {
            Some(path) => Some(compute_digest(path, self.config.hash_chunk_size)?),
            None => None,
        };

        let baseline = BaselineMetrics {
            series_id: self.run.series_id.clone(),
            horizon: self.run.horizon,
            timestamp: self.run.timestamp,
            forecastability: profile,
            metrics: summary,
            ci_baseline_rule: self.config.ci_baseline_rule(),
            ci_floor: Some(self.stage.decision.ci_floor),
            selected_model: selected,
            pass_ci: self.stage.decision.pass_ci,
            metadata: RunMetadata {
                input_hash,
                phase: self.run.phase,
                aggregation_level: self.run.aggregation_level.clone(),
                serve_hash: serve,
                commit_hash: commit_hash(Path::new(".")),
            },
            dm_test,
            drift_monitor,
            anchor_bias,
        };

        let Evaluated {
            forecasts,
            evaluation,
            ..
        } = self.stage;
        let stage = Analyzed {
            forecasts,
            evaluation,
            baseline,
            breakdown,
        };
        Ok(GateRun {
            run: self.run,
            config: self.config,
            cascade: self.cascade,
            stage,
        })
    }

    /// Forecastability of the reported series over history and holdout
    fn profile_forecastability(&self) -> Option<Forecastability> {
        let mut points: Vec<&Observation> = self
            .stage
            .history
            .iter()
            .chain(&self.stage.actuals)
            .filter(|obs| obs.unique_id == self.run.series_id)
            .collect();
        if self.stage.history.is_empty() || points.is_empty() {
            return None;
        }
        points.sort_by_key(|obs| obs.ds);
        let values: Vec<f64> = points.into_iter().map(|obs| obs.y).collect();

        match forecastability(&values) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(series_id = %self.run.series_id, error = %e, "Forecastability profile skipped");
                None
            }
        }
    }

    /// Advisory significance test of the selected model against the baseline
    fn compare_with_baseline(&self, selected: &str) -> Option<SignificanceResult> {
        let baseline = &self.config.baseline_model;
        if selected == baseline {
            info!(model = %selected, "Selected model is the significance baseline, test skipped");
            return None;
        }

        match significance_test(&self.stage.forecasts, &self.stage.actuals, selected, baseline) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(model = %selected, against = %baseline, error = %e, "Significance test skipped");
                None
            }
        }
    }
}

impl GateRun<Analyzed> {
    pub fn baseline(&self) -> &BaselineMetrics {
        &self.stage.baseline
    }

    pub fn error_breakdown(&self) -> Option<&ErrorBreakdown> {
        self.stage.breakdown.as_ref()
    }

    pub fn evaluation(&self) -> &Evaluation {
        &self.stage.evaluation
    }

    /// Write every artifact except the ledger, then report to the tracker
    pub fn persist(self, tracker: &mut dyn ExperimentTracker) -> Result<GateRun<Persisted>> {
        fs::create_dir_all(&self.run.output_dir)?;

        if let Some(profile) = &self.stage.baseline.forecastability {
            write_json(self.run.artifact_path(FORECASTABILITY), profile)?;
        }

        let metrics_path = self.run.artifact_path(BASELINE_METRICS);
        write_json(&metrics_path, &self.stage.baseline)?;

        if let Some(breakdown) = &self.stage.breakdown {
            write_error_breakdown(self.run.artifact_path(ERROR_BREAKDOWN), breakdown)?;
        }

        let n_models = self.stage.forecasts.models().len();
        let forecasts_path = self.run.artifact_path(BASELINE_FORECASTS);
        self.stage
            .forecasts
            .write_csv(&forecasts_path, &self.run.run_id, self.run.horizon, n_models)?;

        let info_path = self.run.artifact_path(RUN_INFO);
        let run_info = RunInfo {
            run_id: self.run.run_id.clone(),
            horizon: self.run.horizon,
            n_models,
            input_file: self.run.input_file.clone(),
            timestamp: self.run.timestamp,
        };
        write_json(&info_path, &run_info)?;

        info!(output_dir = %self.run.output_dir.display(), "Run artifacts written");

        let record = self.tracking_record(&[&metrics_path, &forecasts_path, &info_path]);
        track_best_effort(tracker, &record);

        let stage = Persisted {
            baseline: self.stage.baseline,
            ledger_inputs: vec![metrics_path, forecasts_path, info_path],
        };
        Ok(GateRun {
            run: self.run,
            config: self.config,
            cascade: self.cascade,
            stage,
        })
    }

    fn tracking_record(&self, artifacts: &[&PathBuf]) -> TrackingRecord {
        let baseline = &self.stage.baseline;
        let mut record = TrackingRecord::new(self.run.run_id.clone())
            .param("series_id", &baseline.series_id)
            .param("horizon", baseline.horizon)
            .param("phase", self.run.phase)
            .param("aggregation_level", &self.run.aggregation_level)
            .tag("selected_model", baseline.selected_model.clone())
            .tag("pass_ci", baseline.pass_ci.to_string());

        for (model, metrics) in &baseline.metrics {
            record = record
                .metric(format!("{model}_mae"), metrics.mae)
                .metric(format!("{model}_bias"), metrics.bias)
                .metric(format!("{model}_score"), metrics.score);
        }
        for path in artifacts {
            record = record.artifact(*path);
        }
        record
    }
}

impl GateRun<Persisted> {
    pub fn baseline(&self) -> &BaselineMetrics {
        &self.stage.baseline
    }

    /// Write the audit ledger and verify it straight away
    ///
    /// Mismatches are logged and kept on the sealed run, never raised.
    pub fn seal(self) -> Result<GateRun<Sealed>> {
        let chunk = self.config.hash_chunk_size;
        let ledger_path = write_ledger(
            &self.run.output_dir,
            &self.run.run_id,
            &self.stage.ledger_inputs,
            chunk,
        )?;

        let mismatches = verify_ledger_with_chunk(&ledger_path, &self.run.output_dir, chunk)?;
        if mismatches.is_empty() {
            info!(run_id = %self.run.run_id, "Ledger verification passed");
        } else {
            for (file, mismatch) in &mismatches {
                warn!(file = %file, ?mismatch, "Ledger mismatch right after sealing");
            }
        }

        let stage = Sealed {
            baseline: self.stage.baseline,
            ledger_path,
            mismatches,
        };
        Ok(GateRun {
            run: self.run,
            config: self.config,
            cascade: self.cascade,
            stage,
        })
    }
}

impl GateRun<Sealed> {
    pub fn baseline(&self) -> &BaselineMetrics {
        &self.stage.baseline
    }

    pub fn ledger_path(&self) -> &Path {
        &self.stage.ledger_path
    }

    /// Mismatches found by the post-seal verification
    pub fn mismatches(&self) -> &BTreeMap<String, Mismatch> {
        &self.stage.mismatches
    }

    pub fn is_verified(&self) -> bool {
        self.stage.mismatches.is_empty()
    }
}

/// Run every stage in order
pub fn run_gate(
    run: ForecastRun,
    config: GateConfig,
    forecasts: ForecastTable,
    history: Vec<Observation>,
    actuals: Vec<Observation>,
    cascade: Option<CascadeContext>,
    tracker: &mut dyn ExperimentTracker,
) -> Result<GateRun<Sealed>> {
    let mut pending = GateRun::new(run, config, forecasts, actuals).with_history(history);
    if let Some(cascade) = cascade {
        pending = pending.with_cascade(cascade);
    }
    pending.evaluate()?.analyze()?.persist(tracker)?.seal()
}
