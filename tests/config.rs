//! Configuration parsing tests
//!
//! These tests verify TOML config parsing works correctly.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn loadgen() -> Command {
    Command::cargo_bin("loadgen").unwrap()
}

#[test]
fn minimal_config_validates() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");

    fs::write(
        &config,
        r#"
[target]
addr = "127.0.0.1:8043"
"#,
    )
    .unwrap();

    loadgen()
        .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Configuration validated"))
        .stderr(predicate::str::contains("127.0.0.1:8043"))
        .stderr(predicate::str::contains("Concurrency: 51"));
}

#[test]
fn config_with_all_options_validates() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");

    fs::write(
        &config,
        r#"
[target]
addr = "10.1.2.3:9000"
timeout = "100ms"

[load]
rate = 200
duration = "30s"
buffer = 128
max_in_flight = 10
"#,
    )
    .unwrap();

    loadgen()
        .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
        .assert()
        .success()
        .stderr(predicate::str::contains("10.1.2.3:9000"))
        .stderr(predicate::str::contains("200 calls/s"))
        .stderr(predicate::str::contains("Buffer:      128"))
        .stderr(predicate::str::contains("Concurrency: 10"));
}

#[test]
fn cli_flags_override_config() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");

    fs::write(
        &config,
        r#"
[target]
addr = "10.1.2.3:9000"

[load]
rate = 200
"#,
    )
    .unwrap();

    loadgen()
        .args([
            "run",
            "127.0.0.1:7000",
            "-f",
            config.to_str().unwrap(),
            "-r",
            "0",
            "--dry-run",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("127.0.0.1:7000"))
        .stderr(predicate::str::contains("unthrottled"));
}

#[test]
fn env_var_with_default_validates() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");

    fs::write(
        &config,
        r#"
[target]
addr = "${LOADGEN_CONFIG_TEST_ADDR:-127.0.0.1:8555}"
"#,
    )
    .unwrap();

    loadgen()
        .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
        .env_remove("LOADGEN_CONFIG_TEST_ADDR")
        .assert()
        .success()
        .stderr(predicate::str::contains("127.0.0.1:8555"));
}

#[test]
fn env_var_is_substituted() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");

    fs::write(
        &config,
        r#"
[target]
addr = "${LOADGEN_CONFIG_TEST_TARGET}"
"#,
    )
    .unwrap();

    loadgen()
        .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
        .env("LOADGEN_CONFIG_TEST_TARGET", "192.168.0.9:8043")
        .assert()
        .success()
        .stderr(predicate::str::contains("192.168.0.9:8043"));
}

#[test]
fn missing_env_var_fails() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");

    fs::write(&config, "[target]\naddr = \"${LOADGEN_CONFIG_TEST_MISSING}\"\n").unwrap();

    loadgen()
        .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
        .env_remove("LOADGEN_CONFIG_TEST_MISSING")
        .assert()
        .failure()
        .stderr(predicate::str::contains("LOADGEN_CONFIG_TEST_MISSING"));
}

#[test]
fn invalid_toml_fails() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");

    fs::write(&config, "[target\naddr = ").unwrap();

    loadgen()
        .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn missing_file_fails() {
    loadgen()
        .args(["run", "-f", "/nonexistent/loadgen.toml", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn config_without_target_fails() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");

    fs::write(&config, "[load]\nrate = 10\n").unwrap();

    loadgen()
        .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Target address is required"));
}
