//! CLI integration tests for crossdb-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for error conditions that occur before any connection.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the crossdb-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("crossdb-migrate").unwrap()
}

/// A config that validates but points at servers nobody runs.
fn valid_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
source:
  engine: mssql
  host: 127.0.0.1
  port: 1
  database: shop
  user: sa
  password: secret
target:
  engine: postgres
  host: 127.0.0.1
  port: 1
  database: shop_copy
  user: app
"#
    )
    .unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("dump"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--target-schema"))
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--strategy"))
        .stdout(predicate::str::contains("--no-data"));
}

#[test]
fn test_dump_requires_output() {
    cmd()
        .arg("dump")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--output"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("crossdb-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_and_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--progress"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_unknown_engine_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:\n  engine: oracle\n  host: db\n  user: scott").unwrap();
    writeln!(file, "target:\n  engine: postgres\n  host: db\n  user: app").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "inspect"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("source.engine"));
}

#[test]
fn test_invalid_strategy_exits_with_code_1() {
    let config = valid_config();
    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "run",
            "--strategy",
            "teleport",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid insert strategy"));
}

#[test]
fn test_zero_workers_exits_with_code_1() {
    let config = valid_config();
    cmd()
        .args(["--config", config.path().to_str().unwrap(), "run", "--workers", "0"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("workers"));
}

#[test]
fn test_import_missing_script_exits_with_code_7() {
    let config = valid_config();
    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "import",
            "--script",
            "no_such_script.sql",
        ])
        .assert()
        .code(7);
}
