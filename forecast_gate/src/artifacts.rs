//! Run artifacts: file names, documents and JSON persistence

use crate::decomposition::ErrorBreakdown;
use crate::drift::DriftReport;
use crate::error::Result;
use crate::evaluation::MetricSummary;
use crate::forecastability::Forecastability;
use crate::significance::SignificanceResult;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const BASELINE_METRICS: &str = "baseline_metrics.json";
pub const BASELINE_FORECASTS: &str = "baseline_forecasts.csv";
pub const ERROR_BREAKDOWN: &str = "error_breakdown.json";
pub const AUDIT_LOG: &str = "audit_log.json";
pub const RUN_INFO: &str = "run_info.json";
pub const FORECASTABILITY: &str = "forecastability.json";
pub const CI_RESULTS: &str = "ci_results.json";
pub const CI_HASH_RESULTS: &str = "ci_hash_results.json";

/// Identity and settings of one pipeline execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRun {
    /// Run identifier
    pub run_id: String,
    /// Number of withheld future periods
    pub horizon: usize,
    /// Series the run reports on
    pub series_id: String,
    /// Start time of the run
    pub timestamp: DateTime<Utc>,
    /// Pipeline maturity level driving the phase gate
    pub phase: u32,
    /// Directory owned by this run
    pub output_dir: PathBuf,
    /// Aggregation label of this level of a cascade
    pub aggregation_level: String,
    /// Source data file, for provenance
    pub input_file: Option<PathBuf>,
}

impl ForecastRun {
    /// Create a run description with the default aggregation label `L1`
    pub fn new(
        run_id: impl Into<String>,
        series_id: impl Into<String>,
        horizon: usize,
        phase: u32,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            horizon,
            series_id: series_id.into(),
            timestamp: Utc::now(),
            phase,
            output_dir: output_dir.into(),
            aggregation_level: "L1".to_string(),
            input_file: None,
        }
    }

    /// Set the aggregation label
    pub fn with_aggregation_level(mut self, level: impl Into<String>) -> Self {
        self.aggregation_level = level.into();
        self
    }

    /// Record the input data file
    pub fn with_input_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_file = Some(path.into());
        self
    }

    /// Path of an artifact inside the run directory
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }
}

/// Metadata block of `baseline_metrics.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<String>,
    pub phase: u32,
    pub aggregation_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_hash: Option<String>,
    pub commit_hash: String,
}

/// Drift block of `baseline_metrics.json`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftMonitor {
    pub last_trained: NaiveDate,
    #[serde(flatten)]
    pub report: DriftReport,
}

/// Contents of `baseline_metrics.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetrics {
    pub series_id: String,
    pub horizon: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecastability: Option<Forecastability>,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub ci_baseline_rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_floor: Option<f64>,
    pub selected_model: String,
    pub pass_ci: bool,
    pub metadata: RunMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm_test: Option<SignificanceResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_monitor: Option<DriftMonitor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_bias: Option<f64>,
}

/// Contents of `run_info.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub horizon: usize,
    pub n_models: usize,
    pub input_file: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

/// Write a value as pretty-printed JSON
pub fn write_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Read a JSON document
pub fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Persist an error breakdown
pub fn write_error_breakdown<P: AsRef<Path>>(path: P, breakdown: &ErrorBreakdown) -> Result<()> {
    write_json(path, breakdown)
}
