// SPDX-License-Identifier: MIT OR Apache-2.0
//! Binary-level tests: argument surface and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;

fn agent() -> Command {
    Command::cargo_bin("outpost-agent").unwrap()
}

#[test]
fn help_lists_the_entry_points() {
    agent()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("configure"))
        .stdout(predicate::str::contains("stop"));
}

#[test]
fn start_without_config_exits_with_the_config_code() {
    let dir = tempfile::tempdir().unwrap();
    agent()
        .args([
            "--data-dir",
            dir.path().to_str().unwrap(),
            "--deployment-guid",
            "test-start-noconfig",
            "start",
            "--server-url",
            "http://127.0.0.1:9/",
        ])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .code(20);
}

#[test]
fn configure_rejects_negative_positions_locally() {
    let dir = tempfile::tempdir().unwrap();
    agent()
        .args([
            "--data-dir",
            dir.path().to_str().unwrap(),
            "configure",
            "--server-url",
            "http://127.0.0.1:9/",
            "--room",
            "Lab 3",
            "--pos-x=-1",
            "--pos-y=0",
        ])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .code(20)
        .stderr(predicate::str::contains("position is invalid"));
}

#[test]
fn stop_without_a_running_instance_is_clean() {
    agent()
        .args(["--deployment-guid", "test-stop-none", "stop"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("no running instance"));
}
