//! CLI contract tests.
//!
//! These drive the built binary end-to-end and pin down the behaviors
//! scripts rely on: exit codes, JSON output, and the project lifecycle.
//! Nothing here needs a board attached.

use assert_cmd::Command;
use predicates::prelude::*;

fn replink() -> Command {
    let mut cmd = Command::cargo_bin("replink").expect("binary built");
    // Tests must not pick up the developer's environment or config.
    cmd.env_remove("REPLINK_PORT");
    cmd.env_remove("REPLINK_NON_INTERACTIVE");
    cmd.env_remove("REPLINK_PROJECTS_DIR");
    cmd
}

#[test]
fn help_lists_subcommands() {
    replink()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("upload"))
        .stdout(predicate::str::contains("list-ports"))
        .stdout(predicate::str::contains("monitor"))
        .stdout(predicate::str::contains("project"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn list_ports_json_is_valid_json() {
    let output = replink()
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let parsed: serde_json::Value =
        serde_json::from_slice(&output).expect("list-ports --json emits valid JSON");
    assert!(parsed.is_array());
}

#[test]
fn project_lifecycle_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let projects_dir = dir.path().to_str().unwrap();

    replink()
        .env("REPLINK_PROJECTS_DIR", projects_dir)
        .args(["project", "new", "blinky"])
        .assert()
        .success();

    replink()
        .env("REPLINK_PROJECTS_DIR", projects_dir)
        .args(["project", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("blinky"));

    replink()
        .env("REPLINK_PROJECTS_DIR", projects_dir)
        .args(["project", "show", "blinky"])
        .assert()
        .success()
        .stdout(predicate::str::contains("from machine import Pin"));

    replink()
        .env("REPLINK_PROJECTS_DIR", projects_dir)
        .args(["project", "delete", "blinky", "--yes"])
        .assert()
        .success();

    replink()
        .env("REPLINK_PROJECTS_DIR", projects_dir)
        .args(["project", "list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn project_show_missing_fails() {
    let dir = tempfile::tempdir().unwrap();

    replink()
        .env("REPLINK_PROJECTS_DIR", dir.path().to_str().unwrap())
        .args(["project", "show", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn project_delete_needs_confirmation_when_non_interactive() {
    let dir = tempfile::tempdir().unwrap();
    let projects_dir = dir.path().to_str().unwrap();

    replink()
        .env("REPLINK_PROJECTS_DIR", projects_dir)
        .args(["project", "new", "keepme"])
        .assert()
        .success();

    replink()
        .env("REPLINK_PROJECTS_DIR", projects_dir)
        .args(["--non-interactive", "project", "delete", "keepme"])
        .assert()
        .failure()
        .code(2);

    // Still there.
    replink()
        .env("REPLINK_PROJECTS_DIR", projects_dir)
        .args(["project", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("keepme"));
}

#[test]
fn upload_without_source_is_a_usage_error() {
    replink()
        .arg("upload")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--project"));
}

#[test]
fn upload_to_missing_port_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("blink.py");
    std::fs::write(&script, "print('hi')\n").unwrap();

    replink()
        .args([
            "--quiet",
            "--non-interactive",
            "--port",
            "/dev/replink-no-such-port",
            "upload",
        ])
        .arg(&script)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn completions_generate_for_bash() {
    replink()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("replink"));
}
