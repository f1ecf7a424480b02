//! Experiment tracking and run provenance
//!
//! Tracking backends are collaborators outside the gate: a failing backend is
//! logged and ignored, it never aborts a run.

use crate::error::{ForecastError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Placeholder commit when version control cannot be queried
pub const UNKNOWN_COMMIT: &str = "unknown";

/// Everything a tracking backend receives about one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub run_id: String,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    pub artifacts: Vec<PathBuf>,
}

impl TrackingRecord {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    pub fn metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }
}

/// Sink for run parameters, metrics and artifacts
pub trait ExperimentTracker {
    /// Record one run
    fn log_run(&mut self, record: &TrackingRecord) -> Result<()>;
}

/// Tracker that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

impl ExperimentTracker for NoopTracker {
    fn log_run(&mut self, record: &TrackingRecord) -> Result<()> {
        debug!(run_id = %record.run_id, "Tracking disabled");
        Ok(())
    }
}

/// Tracker appending one JSON line per run to a file
#[derive(Debug, Clone)]
pub struct JsonlTracker {
    path: PathBuf,
}

#[derive(Serialize)]
struct JsonlEntry<'a> {
    logged_at: DateTime<Utc>,
    #[serde(flatten)]
    record: &'a TrackingRecord,
}

impl JsonlTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ExperimentTracker for JsonlTracker {
    fn log_run(&mut self, record: &TrackingRecord) -> Result<()> {
        let entry = JsonlEntry {
            logged_at: Utc::now(),
            record,
        };
        let line = serde_json::to_string(&entry)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                ForecastError::Tracking(format!("cannot open {}: {e}", self.path.display()))
            })?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Log a run, swallowing any backend failure
///
/// Returns whether the record was accepted.
pub fn track_best_effort(tracker: &mut dyn ExperimentTracker, record: &TrackingRecord) -> bool {
    match tracker.log_run(record) {
        Ok(()) => true,
        Err(e) => {
            warn!(run_id = %record.run_id, error = %e, "Experiment tracking failed, continuing");
            false
        }
    }
}

/// Current commit of the repository containing `dir`, or `"unknown"`
pub fn commit_hash<P: AsRef<Path>>(dir: P) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir.as_ref())
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let hash = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if hash.is_empty() {
                UNKNOWN_COMMIT.to_string()
            } else {
                hash
            }
        }
        Ok(out) => {
            debug!(status = %out.status, "git rev-parse failed");
            UNKNOWN_COMMIT.to_string()
        }
        Err(e) => {
            debug!(error = %e, "git unavailable");
            UNKNOWN_COMMIT.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    struct FailingTracker;

    impl ExperimentTracker for FailingTracker {
        fn log_run(&mut self, _record: &TrackingRecord) -> Result<()> {
            Err(ForecastError::Tracking("server unreachable".to_string()))
        }
    }

    #[test]
    fn test_jsonl_tracker_appends_lines() {
        let dir = tempdir().unwrap();
        let mut tracker = JsonlTracker::new(dir.path().join("runs.jsonl"));
        let record = TrackingRecord::new("r1")
            .param("horizon", 7)
            .metric("score", 1.25)
            .tag("selected_model", "Naive");

        assert!(track_best_effort(&mut tracker, &record));
        assert!(track_best_effort(&mut tracker, &record));

        let text = fs::read_to_string(tracker.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["run_id"], "r1");
        assert_eq!(parsed["params"]["horizon"], "7");
        assert_eq!(parsed["metrics"]["score"], 1.25);
    }

    #[test]
    fn test_failures_are_swallowed() {
        let record = TrackingRecord::new("r1");
        assert!(!track_best_effort(&mut FailingTracker, &record));
        assert!(track_best_effort(&mut NoopTracker, &record));
    }

    #[test]
    fn test_commit_hash_outside_repository() {
        let dir = tempdir().unwrap();
        // A fresh temp dir is not inside a repository (or git is missing).
        let hash = commit_hash(dir.path());
        assert!(hash == UNKNOWN_COMMIT || hash.len() == 40);
    }
}
