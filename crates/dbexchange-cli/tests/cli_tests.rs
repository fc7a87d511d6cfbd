//! CLI integration tests for dbexchange.
//!
//! These tests verify command-line argument parsing, help output, exit codes
//! for error conditions, and the database-free create action.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::Write;

/// Get a command for the dbexchange binary.
fn cmd() -> Command {
    Command::cargo_bin("dbexchange").unwrap()
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
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("structure"))
        .stdout(predicate::str::contains("create"));
}

#[test]
fn test_export_subcommand_help() {
    cmd()
        .args(["export", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--keys"))
        .stdout(predicate::str::contains("--zip"));
}

#[test]
fn test_import_subcommand_help() {
    cmd()
        .args(["import", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--zip"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dbexchange"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_file_override_flags_exist() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--description"))
        .stdout(predicate::str::contains("--structure"))
        .stdout(predicate::str::contains("--data"))
        .stdout(predicate::str::contains("--binary-folder"));
}

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_1() {
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "structure"])
        .assert()
        .code(1);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "database: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "structure"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_required_fields_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "database:").unwrap();
    writeln!(file, "  host: \"\"").unwrap();
    writeln!(file, "  database: d").unwrap();
    writeln!(file, "  user: u").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "structure"])
        .assert()
        .code(1);
}

#[test]
fn test_create_without_structure_file_exits_with_code_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    fs::write(&config, "database:\n  host: localhost\n  database: d\n  user: u\n").unwrap();

    cmd()
        .current_dir(dir.path())
        .args(["--config", "config.yaml", "create"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("structure"));
}

// =============================================================================
// Create Action (no database required)
// =============================================================================

#[test]
fn test_create_generates_script_from_structure_cache() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("config.yaml"),
        "database:\n  host: localhost\n  database: d\n  user: u\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("dbexportstructure.json"),
        r#"{"towns":{"attributes":[
            {"field":"town_id","type":"serial","notNull":true,"isPrimaryKey":true},
            {"field":"name","type":"character varying(120)"}]}}"#,
    )
    .unwrap();

    cmd()
        .current_dir(dir.path())
        .args(["--config", "config.yaml", "create"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dbcreate.sql"));

    let script = fs::read_to_string(dir.path().join("dbcreate.sql")).unwrap();
    assert!(script.contains("create table \"towns\""));
    assert!(script.contains("primary key (\"town_id\")"));
}

#[test]
fn test_create_honors_structure_override() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("config.yaml"),
        "database:\n  host: localhost\n  database: d\n  user: u\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("other.json"),
        r#"{"units":{"attributes":[{"field":"unit_id","type":"serial"}]}}"#,
    )
    .unwrap();

    cmd()
        .current_dir(dir.path())
        .args(["--config", "config.yaml", "--structure", "other.json", "create"])
        .assert()
        .success();

    let script = fs::read_to_string(dir.path().join("dbcreate.sql")).unwrap();
    assert!(script.contains("create table \"units\""));
}

// =============================================================================
// No Subcommand Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
