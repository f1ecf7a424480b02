use forecast_gate::audit::{check_ledger, compute_digest, verify_ledger, write_ledger, AuditLedger, Mismatch};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn write_artifacts(dir: &Path) -> Vec<PathBuf> {
    let files = [
        ("baseline_metrics.json", "{\"pass_ci\": true}"),
        ("baseline_forecasts.csv", "unique_id,ds,Naive\nA,2024-01-01,1.0\n"),
        ("run_info.json", "{\"run_id\": \"r1\"}"),
    ];
    files
        .iter()
        .map(|(name, content)| {
            let path = dir.join(name);
            fs::write(&path, content).unwrap();
            path
        })
        .collect()
}

#[test]
fn test_ledger_round_trip_is_clean() {
    let dir = tempdir().unwrap();
    let artifacts = write_artifacts(dir.path());

    let ledger_path = write_ledger(dir.path(), "r1", &artifacts, 8192).unwrap();
    let ledger: AuditLedger = serde_json::from_str(&fs::read_to_string(&ledger_path).unwrap()).unwrap();

    assert_eq!(ledger.run_id, "r1");
    assert_eq!(ledger.files.len(), 3);
    assert_eq!(
        ledger.files["run_info.json"],
        compute_digest(dir.path().join("run_info.json"), 4).unwrap()
    );

    assert!(verify_ledger(&ledger_path, dir.path()).unwrap().is_empty());
    // Verification is read-only and repeatable
    assert!(verify_ledger(&ledger_path, dir.path()).unwrap().is_empty());
}

#[test]
fn test_single_byte_mutation_is_reported() {
    let dir = tempdir().unwrap();
    let artifacts = write_artifacts(dir.path());
    let ledger_path = write_ledger(dir.path(), "r1", &artifacts, 8192).unwrap();

    let target = dir.path().join("baseline_forecasts.csv");
    let mut bytes = fs::read(&target).unwrap();
    let last = bytes.len() - 2;
    bytes[last] = b'2';
    fs::write(&target, bytes).unwrap();

    let mismatches = verify_ledger(&ledger_path, dir.path()).unwrap();
    assert_eq!(mismatches.len(), 1);
    match &mismatches["baseline_forecasts.csv"] {
        Mismatch::Changed { expected, actual } => {
            assert_ne!(expected, actual);
            assert_eq!(actual, &compute_digest(&target, 8192).unwrap());
        }
        other => panic!("unexpected mismatch: {other:?}"),
    }
}

#[test]
fn test_deleted_file_is_missing() {
    let dir = tempdir().unwrap();
    let artifacts = write_artifacts(dir.path());
    let ledger_path = write_ledger(dir.path(), "r1", &artifacts, 8192).unwrap();
    fs::remove_file(dir.path().join("run_info.json")).unwrap();

    let mismatches = verify_ledger(&ledger_path, dir.path()).unwrap();
    assert_eq!(mismatches.get("run_info.json"), Some(&Mismatch::Missing));

    let json = serde_json::to_value(&mismatches).unwrap();
    assert_eq!(json["run_info.json"], "MISSING");
}

#[test]
fn test_directory_in_place_of_artifact_is_a_mismatch() {
    let dir = tempdir().unwrap();
    let artifacts = write_artifacts(dir.path());
    let ledger_path = write_ledger(dir.path(), "r1", &artifacts, 8192).unwrap();
    let expected = compute_digest(dir.path().join("run_info.json"), 8192).unwrap();

    fs::remove_file(dir.path().join("run_info.json")).unwrap();
    fs::create_dir(dir.path().join("run_info.json")).unwrap();

    let mismatches = verify_ledger(&ledger_path, dir.path()).unwrap();
    assert_eq!(mismatches.len(), 1);
    match &mismatches["run_info.json"] {
        Mismatch::Unreadable { expected: recorded, error } => {
            assert_eq!(recorded, &expected);
            assert!(!error.is_empty());
        }
        other => panic!("unexpected mismatch: {other:?}"),
    }

    let check = check_ledger(&ledger_path, dir.path(), false).unwrap();
    assert!(!check.passed);
    let json = serde_json::to_value(&check.mismatches).unwrap();
    assert_eq!(json["run_info.json"]["expected"], expected.as_str());
}

#[test]
fn test_verification_against_copied_directory() {
    let dir = tempdir().unwrap();
    let artifacts = write_artifacts(dir.path());
    let ledger_path = write_ledger(dir.path(), "r1", &artifacts, 8192).unwrap();

    let copy = tempdir().unwrap();
    for path in &artifacts {
        fs::copy(path, copy.path().join(path.file_name().unwrap())).unwrap();
    }

    let check = check_ledger(&ledger_path, copy.path(), false).unwrap();
    assert!(check.passed);
    assert!(!check.overridden);
}

#[test]
fn test_missing_ledger_is_an_error() {
    let dir = tempdir().unwrap();
    assert!(verify_ledger(dir.path().join("audit_log.json"), dir.path()).is_err());
}
