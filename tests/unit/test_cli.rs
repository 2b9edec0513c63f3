//! Binary smoke tests

use assert_cmd::Command;
use predicates::prelude::*;
use sessionguard::testing::free_port;

fn sessionguard(home: &tempfile::TempDir) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("sessionguard").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env_remove("SESSIONGUARD_SERVER_URL")
        .env_remove("SESSIONGUARD_DEVICE")
        .env_remove("SESSIONGUARD_ADB")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    let home = tempfile::tempdir().unwrap();
    sessionguard(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("diagnose"))
        .stdout(predicate::str::contains("clean-zombies"));
}

#[test]
fn test_cli_version() {
    let home = tempfile::tempdir().unwrap();
    sessionguard(&home).arg("--version").assert().success();
}

#[test]
fn test_probe_closed_port_exits_with_network_code() {
    let home = tempfile::tempdir().unwrap();
    let port = free_port();
    sessionguard(&home)
        .args(["probe", "127.0.0.1", &port.to_string(), "--timeout-ms", "300"])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("not reachable"));
}

#[test]
fn test_server_status_json_reports_refused() {
    let home = tempfile::tempdir().unwrap();
    let port = free_port();
    sessionguard(&home)
        .env("SESSIONGUARD_SERVER_URL", format!("http://127.0.0.1:{}", port))
        .args(["server-status", "--format", "json"])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("\"refused\""));
}

#[test]
fn test_invalid_config_file_exits_with_config_code() {
    let home = tempfile::tempdir().unwrap();
    let path = home.path().join("bad.toml");
    std::fs::write(&path, "[retry]\nmax_retries = 0\n").unwrap();
    sessionguard(&home)
        .arg("--config")
        .arg(&path)
        .arg("devices")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("retry.max_retries"));
}
