//! Audit ledger
//!
//! A run's artifacts are fingerprinted with SHA-256 once everything else has
//! been written. Verification recomputes the digests and reports what changed;
//! it never raises on a mismatch, the caller picks the policy.

use crate::artifacts::{read_json, write_json, AUDIT_LOG, CI_HASH_RESULTS};
use crate::error::{ForecastError, Result};
use crate::evaluation::MetricSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Length of the serving identifier in hex characters
pub const SERVE_HASH_LEN: usize = 8;

/// Stream a file through SHA-256 in `chunk_size` byte reads
pub fn compute_digest<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<String> {
    if chunk_size == 0 {
        return Err(ForecastError::InvalidParameter(
            "chunk_size must be positive".to_string(),
        ));
    }

    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Write-once fingerprint record of a run directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLedger {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    /// File name to hex digest
    pub files: BTreeMap<String, String>,
}

/// Discrepancy found for one ledger entry
///
/// Serialized as the string `"MISSING"`, as `{expected, actual}` or, for a
/// path that can no longer be read as a file, as `{expected, error}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// The tracked file no longer exists
    Missing,
    /// The file exists but its content changed
    Changed { expected: String, actual: String },
    /// The path exists but cannot be hashed, e.g. it is now a directory
    Unreadable { expected: String, error: String },
}

const MISSING_MARKER: &str = "MISSING";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MismatchRepr {
    Marker(String),
    Changed { expected: String, actual: String },
    Unreadable { expected: String, error: String },
}

impl Serialize for Mismatch {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let repr = match self {
            Mismatch::Missing => MismatchRepr::Marker(MISSING_MARKER.to_string()),
            Mismatch::Changed { expected, actual } => MismatchRepr::Changed {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            Mismatch::Unreadable { expected, error } => MismatchRepr::Unreadable {
                expected: expected.clone(),
                error: error.clone(),
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Mismatch {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match MismatchRepr::deserialize(deserializer)? {
            MismatchRepr::Marker(text) if text == MISSING_MARKER => Ok(Mismatch::Missing),
            MismatchRepr::Marker(text) => Err(serde::de::Error::custom(format!(
                "unknown mismatch marker \"{text}\""
            ))),
            MismatchRepr::Changed { expected, actual } => Ok(Mismatch::Changed { expected, actual }),
            MismatchRepr::Unreadable { expected, error } => Ok(Mismatch::Unreadable { expected, error }),
        }
    }
}

/// Fingerprint `artifact_paths` and persist the ledger as `audit_log.json`
///
/// Entries are keyed by file name, so every artifact must live directly in
/// `out_dir` for a later verification to find it. Returns the ledger path.
pub fn write_ledger<P: AsRef<Path>>(
    out_dir: P,
    run_id: &str,
    artifact_paths: &[PathBuf],
    chunk_size: usize,
) -> Result<PathBuf> {
    let mut files = BTreeMap::new();
    for path in artifact_paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ForecastError::InvalidParameter(format!(
                    "Artifact path {} has no file name",
                    path.display()
                ))
            })?
            .to_string();
        files.insert(name, compute_digest(path, chunk_size)?);
    }

    let ledger = AuditLedger {
        run_id: run_id.to_string(),
        timestamp: Utc::now(),
        files,
    };
    let ledger_path = out_dir.as_ref().join(AUDIT_LOG);
    write_json(&ledger_path, &ledger)?;

    info!(run_id, files = ledger.files.len(), "Audit ledger written");
    Ok(ledger_path)
}

/// Recompute every recorded digest against the files under `base_dir`
///
/// An empty map means the directory is exactly as it was when sealed.
pub fn verify_ledger<P: AsRef<Path>, Q: AsRef<Path>>(
    ledger_path: P,
    base_dir: Q,
) -> Result<BTreeMap<String, Mismatch>> {
    verify_ledger_with_chunk(ledger_path, base_dir, 8192)
}

/// Same as [`verify_ledger`] with an explicit read size
pub fn verify_ledger_with_chunk<P: AsRef<Path>, Q: AsRef<Path>>(
    ledger_path: P,
    base_dir: Q,
    chunk_size: usize,
) -> Result<BTreeMap<String, Mismatch>> {
    let ledger: AuditLedger = read_json(ledger_path)?;
    let base_dir = base_dir.as_ref();

    let mut mismatches = BTreeMap::new();
    for (name, expected) in &ledger.files {
        let path = base_dir.join(name);
        if !path.exists() {
            mismatches.insert(name.clone(), Mismatch::Missing);
            continue;
        }
        let actual = match compute_digest(&path, chunk_size) {
            Ok(actual) => actual,
            Err(ForecastError::IoError(e)) => {
                mismatches.insert(
                    name.clone(),
                    Mismatch::Unreadable {
                        expected: expected.clone(),
                        error: e.to_string(),
                    },
                );
                continue;
            }
            Err(e) => return Err(e),
        };
        if &actual != expected {
            mismatches.insert(
                name.clone(),
                Mismatch::Changed {
                    expected: expected.clone(),
                    actual,
                },
            );
        }
    }
    Ok(mismatches)
}

/// Outcome of applying the verification policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerCheck {
    pub passed: bool,
    /// Mismatches were found but `force` let the run through
    pub overridden: bool,
    pub mismatches: BTreeMap<String, Mismatch>,
}

/// Verify a ledger and apply the `force` override
pub fn check_ledger<P: AsRef<Path>, Q: AsRef<Path>>(
    ledger_path: P,
    base_dir: Q,
    force: bool,
) -> Result<LedgerCheck> {
    let mismatches = verify_ledger(ledger_path, base_dir)?;
    let clean = mismatches.is_empty();

    if !clean {
        for (name, mismatch) in &mismatches {
            warn!(file = %name, ?mismatch, "Ledger mismatch");
        }
        if force {
            warn!(count = mismatches.len(), "Ledger mismatches overridden by force");
        }
    }

    Ok(LedgerCheck {
        passed: clean || force,
        overridden: !clean && force,
        mismatches,
    })
}

/// Persist a ledger check as `ci_hash_results.json`
pub fn write_hash_report<P: AsRef<Path>>(dir: P, check: &LedgerCheck) -> Result<PathBuf> {
    let path = dir.as_ref().join(CI_HASH_RESULTS);
    write_json(&path, check)?;
    Ok(path)
}

#[derive(Serialize)]
struct ServeIdentity<'a> {
    series_id: &'a str,
    selected_model: &'a str,
    metrics: &'a MetricSummary,
    timestamp: &'a DateTime<Utc>,
    phase: u32,
}

/// Short digest identifying a selection outcome for serving
///
/// Computed over the compact JSON of the identity fields with keys in sorted
/// order, so the same outcome always yields the same identifier.
pub fn serve_hash(
    series_id: &str,
    selected_model: &str,
    metrics: &MetricSummary,
    timestamp: &DateTime<Utc>,
    phase: u32,
) -> Result<String> {
    let identity = ServeIdentity {
        series_id,
        selected_model,
        metrics,
        timestamp,
        phase,
    };
    // Value maps are ordered, which sorts the keys at every level.
    let canonical = serde_json::to_value(&identity)?.to_string();
    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    Ok(digest[..SERVE_HASH_LEN].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_digest_is_independent_of_chunk_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, vec![7u8; 10_000]).unwrap();

        let small = compute_digest(&path, 3).unwrap();
        let large = compute_digest(&path, 8192).unwrap();
        assert_eq!(small, large);
        assert_eq!(small.len(), 64);
    }

    #[test]
    fn test_digest_of_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();

        assert_eq!(
            compute_digest(&path, 16).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_mismatch_serialization() {
        let mut map = BTreeMap::new();
        map.insert("a.json".to_string(), Mismatch::Missing);
        map.insert(
            "b.csv".to_string(),
            Mismatch::Changed {
                expected: "00".to_string(),
                actual: "11".to_string(),
            },
        );

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(
            json,
            r#"{"a.json":"MISSING","b.csv":{"expected":"00","actual":"11"}}"#
        );

        let back: BTreeMap<String, Mismatch> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_force_overrides_mismatch() {
        let dir = tempdir().unwrap();
        let tracked = dir.path().join("baseline_metrics.json");
        fs::write(&tracked, "{}").unwrap();
        let ledger = write_ledger(dir.path(), "run", &[tracked.clone()], 64).unwrap();
        fs::remove_file(&tracked).unwrap();

        let strict = check_ledger(&ledger, dir.path(), false).unwrap();
        assert!(!strict.passed);
        assert!(!strict.overridden);

        let forced = check_ledger(&ledger, dir.path(), true).unwrap();
        assert!(forced.passed);
        assert!(forced.overridden);
        assert_eq!(forced.mismatches.get("baseline_metrics.json"), Some(&Mismatch::Missing));

        let report = write_hash_report(dir.path(), &forced).unwrap();
        assert!(report.ends_with(CI_HASH_RESULTS));
    }

    #[test]
    fn test_serve_hash_is_stable_and_sensitive() {
        let metrics = MetricSummary {
            mae: 1.5,
            bias: -0.25,
            score: 1.75,
        };
        let ts = DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let first = serve_hash("A", "Naive", &metrics, &ts, 2).unwrap();
        let again = serve_hash("A", "Naive", &metrics, &ts, 2).unwrap();
        let other = serve_hash("A", "Naive", &metrics, &ts, 3).unwrap();

        assert_eq!(first.len(), SERVE_HASH_LEN);
        assert_eq!(first, again);
        assert_ne!(first, other);
    }
}
