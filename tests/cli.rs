//! Smoke tests for the helix binary
//!
//! Each test drives the real executable against its own temporary data
//! directory.

mod common;

use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

use common::{write_course, COURSE};

/// Run helix with `--data-dir` and return (success, stdout, stderr)
fn run_helix(data_dir: &Path, args: &[&str]) -> (bool, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_helix"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .output()
        .expect("Failed to execute helix");

    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

fn initialized() -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let (success, _, stderr) = run_helix(temp.path(), &["init"]);
    assert!(success, "helix init should succeed: {}", stderr);
    write_course(temp.path(), 6);
    temp
}

#[test]
fn test_helix_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_helix"))
        .arg("--version")
        .output()
        .expect("Failed to execute helix");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("helix"));
}

#[test]
fn test_status_before_init() {
    let temp = TempDir::new().unwrap();
    let (success, stdout, _) = run_helix(temp.path(), &["status"]);
    assert!(success);
    assert!(stdout.contains("NOT INITIALIZED"));
}

#[test]
fn test_init_creates_layout() {
    let temp = initialized();
    assert!(temp.path().join("helix.sqlite").exists());
    assert!(temp.path().join("config.toml").exists());
    assert!(temp.path().join("courses").is_dir());

    let (success, stdout, _) = run_helix(temp.path(), &["status"]);
    assert!(success);
    assert!(stdout.contains("Learners: 0"));
}

#[test]
fn test_next_respond_status_round() {
    let temp = initialized();
    let learner = ["--learner", "cli-learner", "--course", COURSE];

    let (success, stdout, stderr) = run_helix(temp.path(), &[&["next"][..], &learner[..]].concat());
    assert!(success, "next failed: {}", stderr);
    let cycle: serde_json::Value = serde_json::from_str(&stdout).expect("next prints JSON");
    assert_eq!(cycle["outcome"], "cycle");
    assert_eq!(cycle["lego_id"], "S0001L01");
    assert_eq!(cycle["phase"], "component");

    let (success, stdout, stderr) = run_helix(
        temp.path(),
        &[&["respond"][..], &learner[..], &["--latency-ms", "1800"][..]].concat(),
    );
    assert!(success, "respond failed: {}", stderr);
    let result: serde_json::Value = serde_json::from_str(&stdout).expect("respond prints JSON");
    assert_eq!(result["spike"], false);
    assert_eq!(result["next"], "normal");

    // nothing pending any more
    let (success, _, _) = run_helix(temp.path(), &[&["respond"][..], &learner[..]].concat());
    assert!(!success);

    let (success, stdout, _) = run_helix(temp.path(), &[&["status"][..], &learner[..]].concat());
    assert!(success);
    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["cycles"], 1);
    assert_eq!(status["items_practiced"], 1);

    let (success, stdout, _) = run_helix(temp.path(), &[&["end-session"][..], &learner[..]].concat());
    assert!(success);
    let session: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(session["ended_at"].is_string());
}

#[test]
fn test_unknown_course_fails() {
    let temp = initialized();
    let (success, _, stderr) = run_helix(temp.path(), &["next", "--learner", "x", "--course", "nope"]);
    assert!(!success);
    assert!(!stderr.is_empty());
}

#[test]
fn test_simulate_concurrent_learners() {
    let temp = initialized();
    let (success, stdout, stderr) = run_helix(
        temp.path(),
        &["simulate", "--course", COURSE, "--learners", "3", "--cycles", "25", "--json"],
    );
    assert!(success, "simulate failed: {}", stderr);

    let reports: Vec<serde_json::Value> = serde_json::from_str(&stdout).expect("simulate prints JSON");
    assert_eq!(reports.len(), 3);
    for report in &reports {
        assert_eq!(report["cycles"], 25);
        assert!(report["legos_seen"].as_u64().unwrap() > 0);
    }

    let (success, stdout, _) = run_helix(temp.path(), &["status"]);
    assert!(success);
    assert!(stdout.contains("Learners: 3"));
    assert!(stdout.contains("0 open"));
}
