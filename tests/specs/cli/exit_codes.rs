//! Black-box CLI exit-code contract.

use assert_cmd::Command;

fn gantry() -> Command {
    Command::cargo_bin("gantry").unwrap()
}

#[test]
fn version_exits_zero() {
    gantry().arg("--version").assert().success();
}

#[test]
fn help_exits_zero() {
    gantry().arg("--help").assert().success();
}

#[test]
fn unknown_subcommand_is_wrong_command() {
    gantry().arg("dance").assert().code(6);
}

#[test]
fn missing_subcommand_is_an_argument_error() {
    gantry().assert().code(4);
}

#[test]
#[serial_test::serial]
fn run_step_succeeds_on_a_fresh_db() {
    let dir = tempfile::tempdir().unwrap();
    let assert = gantry()
        .env("GANTRY_DB", dir.path())
        .args(["run", "step"])
        .assert()
        .success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    assert!(output.contains("nothing happened"), "{output}");
}

#[test]
#[serial_test::serial]
fn unknown_call_term_is_not_implemented() {
    let dir = tempfile::tempdir().unwrap();
    gantry()
        .env("GANTRY_DB", dir.path())
        .args(["call", "frobnicate"])
        .assert()
        .code(3);
}

#[test]
#[serial_test::serial]
fn info_without_daemon_is_a_user_todo() {
    let dir = tempfile::tempdir().unwrap();
    gantry()
        .env("GANTRY_DB", dir.path())
        .arg("info")
        .assert()
        .code(2);
}
