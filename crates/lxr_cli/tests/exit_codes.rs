//! Exit code tests for the lxc-runner binary.
//!
//! None of these reach pct or pveam, so they run on any host.

use std::process::{Command, Output};

fn lxc_runner(args: &[&str], path: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lxc-runner"))
        .args(args)
        .env("PATH", path)
        .env_remove("LXC_RUNNER_CONFIG")
        .env_remove("RUST_LOG")
        .env_remove("SYSTEM_FAILURE_EXIT_CODE")
        .output()
        .expect("failed to launch lxc-runner")
}

#[test]
fn test_help_succeeds() {
    let output = lxc_runner(&["--help"], "");
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("EXIT CODES"));
}

#[test]
fn test_invalid_arguments() {
    let output = lxc_runner(&["prepare", "--cores", "many"], "");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_unknown_command() {
    let output = lxc_runner(&["config"], "");
    assert_eq!(output.status.code(), Some(5));
}

#[test]
fn test_missing_tools() {
    let dir = tempfile::tempdir().unwrap();
    let output = lxc_runner(&["--id", "7", "cleanup"], dir.path().to_str().unwrap());

    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("pct"));
}

#[test]
fn test_broken_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[readiness]\ntimeout_secs = \"soon\"\n").unwrap();

    let output = lxc_runner(
        &["--config", config.to_str().unwrap(), "cleanup", "--all"],
        "",
    );
    assert_eq!(output.status.code(), Some(1));
}
