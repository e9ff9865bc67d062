use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

const REDUNDANT_MASTER: &str = r#"{
  "is_redundant": true,
  "is_master": true,
  "name": "r-12-VM",
  "priority": 100,
  "router_id": 12,
  "password": "s3cret"
}"#;

const STANDALONE: &str = r#"{
  "is_redundant": false,
  "name": "r-13-VM",
  "priority": 100,
  "router_id": 13
}"#;

fn agent() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("redundancy-agent"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_settings(dir: &Path, extra: &str) -> std::path::PathBuf {
    let path = dir.join("agent.yaml");
    let yaml = format!(
        "paths:\n  lock_file: {}\n{}",
        dir.join("transition.lock").display(),
        extra
    );
    fs::write(&path, yaml).expect("write settings");
    path
}

#[test]
fn status_prints_state_as_json() {
    let dir = tempdir().expect("tempdir");
    let state = dir.path().join("state.json");
    fs::write(&state, REDUNDANT_MASTER).expect("write state");
    let settings = write_settings(dir.path(), "");

    agent()
        .arg("--config")
        .arg(&settings)
        .arg("--state")
        .arg(&state)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""state": "master""#))
        .stdout(predicate::str::contains(r#""router_id": 12"#))
        .stdout(predicate::str::contains("s3cret").not());
}

#[test]
fn transition_on_standalone_router_is_noop() {
    let dir = tempdir().expect("tempdir");
    let state = dir.path().join("state.json");
    let inventory = dir.path().join("inventory.json");
    fs::write(&state, STANDALONE).expect("write state");
    fs::write(&inventory, r#"{"interfaces": [], "addresses": []}"#).expect("write inventory");
    let settings = write_settings(dir.path(), "");

    agent()
        .arg("--config")
        .arg(&settings)
        .arg("--state")
        .arg(&state)
        .arg("--inventory")
        .arg(&inventory)
        .arg("master")
        .assert()
        .success();

    assert_eq!(fs::read_to_string(&state).expect("read state"), STANDALONE);
}

#[test]
fn missing_state_file_fails() {
    let dir = tempdir().expect("tempdir");
    let settings = write_settings(dir.path(), "");

    agent()
        .arg("--config")
        .arg(&settings)
        .arg("--state")
        .arg(dir.path().join("absent.json"))
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load router state"));
}

#[test]
fn invalid_settings_rejected() {
    let dir = tempdir().expect("tempdir");
    let state = dir.path().join("state.json");
    fs::write(&state, REDUNDANT_MASTER).expect("write state");
    let settings = write_settings(dir.path(), "lock:\n  attempts: 0\n");

    agent()
        .arg("--config")
        .arg(&settings)
        .arg("--state")
        .arg(&state)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn unknown_command_fails() {
    agent().arg("promote").assert().failure();
}
