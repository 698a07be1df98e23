//! CLI surface checks: help output, argument validation, and early
//! identifier validation (everything that runs before any remote setup).

use assert_cmd::Command;
use predicates::prelude::*;

fn drivemirror() -> Command {
    Command::cargo_bin("drivemirror").expect("binary builds")
}

#[test]
fn test_help_describes_the_tool() {
    drivemirror()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mirror remote object trees"));
}

#[test]
fn test_missing_subcommand_fails() {
    drivemirror().assert().failure();
}

#[test]
fn test_copy_rejects_invalid_source_identifier() {
    drivemirror()
        .args(["copy", "bad id!", "targetFolder0123"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid source identifier"));
}

#[test]
fn test_copy_requires_a_target() {
    drivemirror()
        .args(["copy", "sourceFolder0123"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("destination target is required"));
}

#[test]
fn test_copy_rejects_invalid_target_identifier() {
    drivemirror()
        .args(["copy", "sourceFolder0123", "no"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid destination identifier"));
}

#[test]
fn test_count_rejects_invalid_identifier() {
    drivemirror()
        .args(["count", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid folder identifier"));
}

#[test]
fn test_reserved_source_passes_validation_and_reaches_setup() {
    // "root" is a reserved identifier, so validation passes and the run
    // fails later while loading credentials from a directory that does not
    // exist.
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("progress.sqlite");
    drivemirror()
        .args([
            "--db",
            db_path.to_str().expect("utf-8 path"),
            "--sa-dir",
            "/nonexistent/sa",
            "copy",
            "root",
            "targetFolder0123",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("credential"));
}
