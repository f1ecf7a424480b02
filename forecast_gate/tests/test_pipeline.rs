use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use forecast_gate::artifacts::{read_json, BaselineMetrics, ForecastRun, RunInfo};
use forecast_gate::audit::verify_ledger;
use forecast_gate::cascade::enforce_cascade;
use forecast_gate::config::{GateConfig, PhaseThresholds};
use forecast_gate::data::{split_holdout, DataLoader, Observation};
use forecast_gate::decomposition::ErrorBreakdown;
use forecast_gate::forecast::{add_ensemble_naive, forecast_all, ForecastTable, Naive, SeasonalNaive};
use forecast_gate::pipeline::{run_gate, GateRun};
use forecast_gate::tracking::{JsonlTracker, NoopTracker};
use forecast_gate::ForecastError;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::{tempdir, NamedTempFile};

fn day(offset: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_time(NaiveTime::MIN)
        + Duration::days(offset)
}

// Four weeks of a weekly pattern for one store
fn create_sample_data() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "unique_id,ds,y").unwrap();
    for d in 0..28 {
        let y = 10.0 + (d % 7) as f64;
        writeln!(file, "store_1,{},{}", day(d).format("%Y-%m-%d"), y).unwrap();
    }
    file
}

fn baseline_forecasts(history: &[Observation], horizon: usize) -> ForecastTable {
    let seasonal = SeasonalNaive::new(7).unwrap();
    let mut table = forecast_all(&[&Naive, &seasonal], history, horizon).unwrap();
    add_ensemble_naive(&mut table, "Naive", "SeasonalNaive").unwrap();
    table
}

fn read_breakdown(dir: &Path) -> ErrorBreakdown {
    read_json(dir.join("error_breakdown.json")).unwrap()
}

#[test]
fn test_full_gate_workflow() {
    let data_file = create_sample_data();
    let observations = DataLoader::from_csv(data_file.path()).unwrap();
    let (history, actuals) = split_holdout(&observations, 7).unwrap();
    let forecasts = baseline_forecasts(&history, 7);

    let out = tempdir().unwrap();
    let run = ForecastRun::new("run-1", "store_1", 7, 2, out.path()).with_input_file(data_file.path());
    let mut tracker = JsonlTracker::new(out.path().join("tracking.jsonl"));

    let sealed = run_gate(run, GateConfig::default(), forecasts, history, actuals, None, &mut tracker).unwrap();
    assert!(sealed.is_verified());

    let baseline: BaselineMetrics = read_json(out.path().join("baseline_metrics.json")).unwrap();
    assert_eq!(baseline.selected_model, sealed.baseline().selected_model);
    assert_eq!(baseline.metadata.serve_hash, sealed.baseline().metadata.serve_hash);

    // The seasonal baseline reproduces the weekly pattern exactly
    assert_eq!(baseline.selected_model, "SeasonalNaive");
    assert_eq!(baseline.metrics["SeasonalNaive"].score, 0.0);
    assert!(baseline.pass_ci);
    assert_eq!(baseline.ci_baseline_rule, "min(ensemble_naive, HoltWinters)");

    // Phase 2 features
    let metadata = &baseline.metadata;
    assert_eq!(metadata.phase, 2);
    assert_eq!(metadata.serve_hash.as_ref().map(String::len), Some(8));
    assert_eq!(metadata.input_hash.as_ref().map(String::len), Some(64));
    assert!(!metadata.commit_hash.is_empty());
    assert_eq!(baseline.dm_test.as_ref().map(|t| t.vs.as_str()), Some("ensemble_naive"));

    // Seven holdout residuals are too short a history to judge drift
    let drift = baseline.drift_monitor.unwrap();
    assert!(!drift.report.drift_detected);
    assert_eq!(drift.report.p_value, 1.0);

    let breakdown = read_breakdown(out.path());
    assert_eq!(breakdown.len(), 3);
    assert_eq!(breakdown["SeasonalNaive"].bias_error, 0.0);
    assert_eq!(breakdown["SeasonalNaive"].anchor_bias, None);

    assert!(baseline.forecastability.is_some());
    assert!(out.path().join("forecastability.json").exists());

    let info: RunInfo = read_json(out.path().join("run_info.json")).unwrap();
    assert_eq!(info.n_models, 3);
    assert_eq!(info.horizon, 7);

    let stored = ForecastTable::read_csv(out.path().join("baseline_forecasts.csv")).unwrap();
    assert_eq!(stored.models(), ["Naive", "SeasonalNaive", "ensemble_naive"]);
    assert_eq!(stored.len(), 7);

    let ledger: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(sealed.ledger_path()).unwrap()).unwrap();
    let tracked: Vec<&String> = ledger["files"].as_object().unwrap().keys().collect();
    assert_eq!(tracked, ["baseline_forecasts.csv", "baseline_metrics.json", "run_info.json"]);

    let lines = fs::read_to_string(out.path().join("tracking.jsonl")).unwrap();
    assert_eq!(lines.lines().count(), 1);
}

#[test]
fn test_low_phase_only_produces_core_metrics() {
    let data_file = create_sample_data();
    let observations = DataLoader::from_csv(data_file.path()).unwrap();
    let (history, actuals) = split_holdout(&observations, 7).unwrap();
    let forecasts = baseline_forecasts(&history, 7);

    let out = tempdir().unwrap();
    let run = ForecastRun::new("run-0", "store_1", 7, 1, out.path());
    let analyzed = GateRun::new(run, GateConfig::default(), forecasts, actuals)
        .with_history(history)
        .evaluate()
        .unwrap()
        .analyze()
        .unwrap();

    let baseline = analyzed.baseline();
    assert!(baseline.dm_test.is_none());
    assert!(baseline.drift_monitor.is_none());
    assert!(baseline.metadata.serve_hash.is_none());
    assert!(analyzed.error_breakdown().is_none());

    let sealed = analyzed.persist(&mut NoopTracker).unwrap().seal().unwrap();
    assert!(sealed.is_verified());
    assert!(!out.path().join("error_breakdown.json").exists());
}

/// A single reference model whose last 14 residuals jump from 0 to 5
fn drifting_run(phase: u32, config: GateConfig, dir: &Path) -> forecast_gate::Result<BaselineMetrics> {
    let actuals: Vec<Observation> = (0..40).map(|d| Observation::new("A", day(d), 20.0)).collect();
    let mut forecasts = ForecastTable::new(vec!["ensemble_naive".to_string()]);
    for d in 0..40 {
        let prediction = if d < 26 { 20.0 } else { 15.0 };
        forecasts.push_row("A", day(d), vec![Some(prediction)])?;
    }

    let run = ForecastRun::new("drift", "A", 40, phase, dir);
    let sealed = GateRun::new(run, config, forecasts, actuals)
        .evaluate()?
        .analyze()?
        .persist(&mut NoopTracker)?
        .seal()?;
    Ok(sealed.baseline().clone())
}

#[test]
fn test_drift_fails_the_gate_at_phase_two() {
    let out = tempdir().unwrap();
    let err = drifting_run(2, GateConfig::default(), out.path()).unwrap_err();

    match &err {
        ForecastError::DriftGateFailed { model, p_value } => {
            assert_eq!(model, "ensemble_naive");
            assert!(*p_value < 0.05);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_fatal());
    // Nothing was persisted, let alone sealed
    assert!(!out.path().join("audit_log.json").exists());
}

#[test]
fn test_drift_is_advisory_below_the_hard_gate() {
    let out = tempdir().unwrap();
    let config = GateConfig {
        phase_thresholds: PhaseThresholds {
            drift_hard_gate: 3,
            ..PhaseThresholds::default()
        },
        ..GateConfig::default()
    };

    let baseline = drifting_run(2, config, out.path()).unwrap();
    let drift = baseline.drift_monitor.unwrap();
    assert!(drift.report.drift_detected);
    assert!(drift.report.p_value < 0.05);
    // The selected model is the significance baseline itself
    assert!(baseline.dm_test.is_none());
}

#[test]
fn test_hard_gate_applies_without_the_monitor() {
    let out = tempdir().unwrap();
    let config = GateConfig::from_toml_str(
        "[phase_thresholds]\ndrift_monitor = 3\ndrift_hard_gate = 2\n",
    )
    .unwrap();

    let err = drifting_run(2, config, out.path()).unwrap_err();
    assert!(matches!(err, ForecastError::DriftGateFailed { .. }));
    assert!(!out.path().join("audit_log.json").exists());
}

#[test]
fn test_missing_reference_model_stops_evaluation() {
    let actuals = vec![Observation::new("A", day(0), 1.0)];
    let mut forecasts = ForecastTable::new(vec!["Naive".to_string()]);
    forecasts.push_row("A", day(0), vec![Some(1.0)]).unwrap();

    let run = ForecastRun::new("r", "A", 1, 0, "unused");
    let result = GateRun::new(run, GateConfig::default(), forecasts, actuals).evaluate();
    assert!(matches!(result, Err(ForecastError::MissingReferenceModel { .. })));
}

#[test]
fn test_child_run_records_anchor_bias() {
    let data_file = create_sample_data();
    let observations = DataLoader::from_csv(data_file.path()).unwrap();
    let (history, actuals) = split_holdout(&observations, 7).unwrap();

    let parent_dir = tempdir().unwrap();
    let parent = ForecastRun::new("parent", "store_1", 7, 2, parent_dir.path()).with_aggregation_level("region");
    let parent_baseline = run_gate(
        parent,
        GateConfig::default(),
        baseline_forecasts(&history, 7),
        history.clone(),
        actuals.clone(),
        None,
        &mut NoopTracker,
    )
    .unwrap()
    .baseline()
    .clone();

    // Child forecasts sit one unit above the parent's
    let mut child_forecasts = ForecastTable::new(vec![
        "Naive".to_string(),
        "SeasonalNaive".to_string(),
        "ensemble_naive".to_string(),
    ]);
    for row in baseline_forecasts(&history, 7).rows() {
        let shifted = row.values.iter().map(|v| v.map(|x| x + 1.0)).collect();
        child_forecasts.push_row(row.unique_id.clone(), row.ds, shifted).unwrap();
    }

    let context = enforce_cascade(parent_dir.path()).unwrap();
    let parent_decision = context.parent_gate().decision().unwrap();
    assert_eq!(parent_decision.selected_model, parent_baseline.selected_model);
    assert_eq!(Some(parent_decision.ci_floor), parent_baseline.ci_floor);
    assert!(parent_decision.pass_ci);
    assert_eq!(
        context.parent_drift(),
        parent_baseline.drift_monitor.as_ref().map(|d| &d.report)
    );

    let child_dir = tempdir().unwrap();
    let child = ForecastRun::new("child", "store_1", 7, 2, child_dir.path()).with_aggregation_level("store");
    let sealed = run_gate(
        child,
        GateConfig::default(),
        child_forecasts,
        history,
        actuals,
        Some(context),
        &mut NoopTracker,
    )
    .unwrap();

    let baseline = sealed.baseline();
    assert_eq!(baseline.anchor_bias, Some(1.0));
    assert_eq!(baseline.metadata.aggregation_level, "store");

    let breakdown = read_breakdown(child_dir.path());
    assert_eq!(breakdown[&baseline.selected_model].anchor_bias, Some(1.0));

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(child_dir.path().join("error_breakdown.json")).unwrap()).unwrap();
    assert_eq!(raw[&baseline.selected_model]["Anchor Bias"], 1.0);

    // The parent directory still verifies after serving as anchor
    assert!(verify_ledger(parent_dir.path().join("audit_log.json"), parent_dir.path())
        .unwrap()
        .is_empty());
}

#[test]
fn test_regeneration_from_stored_forecasts() {
    let data_file = create_sample_data();
    let observations = DataLoader::from_csv(data_file.path()).unwrap();
    let (history, actuals) = split_holdout(&observations, 7).unwrap();

    let first_dir = tempdir().unwrap();
    let first = run_gate(
        ForecastRun::new("first", "store_1", 7, 2, first_dir.path()),
        GateConfig::default(),
        baseline_forecasts(&history, 7),
        history.clone(),
        actuals.clone(),
        None,
        &mut NoopTracker,
    )
    .unwrap();

    let stored = ForecastTable::read_csv(first_dir.path().join("baseline_forecasts.csv")).unwrap();
    let second_dir = tempdir().unwrap();
    let second = run_gate(
        ForecastRun::new("second", "store_1", 7, 2, second_dir.path()),
        GateConfig::default(),
        stored,
        history,
        actuals,
        None,
        &mut NoopTracker,
    )
    .unwrap();

    assert_eq!(first.baseline().metrics, second.baseline().metrics);
    assert_eq!(first.baseline().selected_model, second.baseline().selected_model);
}
