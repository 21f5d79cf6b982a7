//! CLI surface tests: argument validation and help output.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_describes_the_server() {
    let mut cmd = Command::cargo_bin("petri").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulation server"))
        .stdout(predicate::str::contains("--port"))
        .stdout(predicate::str::contains("--tick-rate"));
}

#[test]
fn test_rejects_tiny_world() {
    let mut cmd = Command::cargo_bin("petri").unwrap();
    cmd.args(["--width", "4", "--height", "4"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("at least 16x16"));
}

#[test]
fn test_rejects_oversized_world() {
    let mut cmd = Command::cargo_bin("petri").unwrap();
    cmd.args(["--width", "100000", "--height", "64"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_rejects_zero_tick_rate() {
    let mut cmd = Command::cargo_bin("petri").unwrap();
    cmd.args(["--tick-rate", "0"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("tick rate"));
}

#[test]
fn test_rejects_overcrowded_world() {
    // 16×16 = 256 cells cannot hold 10000 colonies.
    let mut cmd = Command::cargo_bin("petri").unwrap();
    cmd.args(["--width", "16", "--height", "16", "--colonies", "10000"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("too small"));
}

#[test]
fn test_rejects_malformed_numbers() {
    let mut cmd = Command::cargo_bin("petri").unwrap();
    cmd.args(["--width", "wide"]).assert().failure();
}
