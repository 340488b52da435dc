//! End-to-end CLI tests for the prefetcher binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const LISTING: &str = r#"{
    "packages": {
        "symfony/symfony": {
            "v3.3.18": {"version_normalized": "3.3.18.0"},
            "v3.4.11": {"version_normalized": "3.4.11.0"},
            "dev-master": {"version_normalized": "9999999-dev"}
        }
    }
}"#;

fn prefetcher() -> Command {
    let mut cmd = Command::cargo_bin("prefetcher").unwrap();
    cmd.env_remove("SYMFONY_REQUIRE").env_remove("RUST_LOG");
    cmd
}

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    prefetcher()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Prefetch package metadata"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    prefetcher()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("prefetcher"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    prefetcher()
        .args(["prefetch", "install", "--invalid-flag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_filter_removes_versions_outside_constraint() {
    let dir = TempDir::new().unwrap();
    let listing = write(&dir, "provider.json", LISTING);

    prefetcher()
        .arg("filter")
        .arg(&listing)
        .args(["--require", "symfony/symfony=~3.4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("v3.4.11"))
        .stdout(predicate::str::contains("dev-master"))
        .stdout(predicate::str::contains("v3.3.18").not());
}

#[test]
fn test_filter_reads_stdin_and_manifest_constraint() {
    let dir = TempDir::new().unwrap();
    let manifest = write(
        &dir,
        "composer.json",
        r#"{"extra": {"symfony": {"require": "3.3.*"}}}"#,
    );

    prefetcher()
        .args(["filter", "-", "--manifest"])
        .arg(&manifest)
        .write_stdin(LISTING)
        .assert()
        .success()
        .stdout(predicate::str::contains("v3.3.18"))
        .stdout(predicate::str::contains("v3.4.11").not());
}

#[test]
fn test_filter_env_override_beats_manifest() {
    let dir = TempDir::new().unwrap();
    let manifest = write(
        &dir,
        "composer.json",
        r#"{"extra": {"symfony": {"require": "3.3.*"}}}"#,
    );

    prefetcher()
        .env("SYMFONY_REQUIRE", "~3.4")
        .args(["filter", "-", "--manifest"])
        .arg(&manifest)
        .write_stdin(LISTING)
        .assert()
        .success()
        .stdout(predicate::str::contains("v3.4.11"))
        .stdout(predicate::str::contains("v3.3.18").not());
}

#[test]
fn test_filter_without_constraints_prints_listing_unchanged() {
    prefetcher()
        .args(["filter", "-"])
        .write_stdin(LISTING)
        .assert()
        .success()
        .stdout(predicate::str::contains("v3.3.18"))
        .stdout(predicate::str::contains("v3.4.11"));
}

#[test]
fn test_filter_invalid_constraint_fails() {
    prefetcher()
        .args(["filter", "-", "--require", "symfony/symfony=foo bar"])
        .write_stdin(LISTING)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid legacy-tags constraint"));
}

#[test]
fn test_filter_invalid_listing_fails() {
    prefetcher()
        .args(["filter", "-"])
        .write_stdin("not json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse listing JSON"));
}

#[test]
fn test_prefetch_with_no_repositories_succeeds_offline() {
    let dir = TempDir::new().unwrap();
    let manifest = write(&dir, "composer.json", r#"{"repositories": []}"#);

    prefetcher()
        .args(["-q", "prefetch", "install", "--no-progress", "--manifest"])
        .arg(&manifest)
        .arg("--cache-dir")
        .arg(dir.path().join("cache"))
        .assert()
        .success();
}

#[test]
fn test_prefetch_non_resolving_command_is_noop() {
    let dir = TempDir::new().unwrap();

    // no manifest: the default repository would be used, but the command gate stops first
    prefetcher()
        .args(["prefetch", "dump-autoload", "--cache-dir"])
        .arg(dir.path())
        .assert()
        .success();
}

#[test]
fn test_prefetch_rejects_invalid_manifest() {
    let dir = TempDir::new().unwrap();
    let manifest = write(&dir, "composer.json", "{ not json");

    prefetcher()
        .args(["prefetch", "install", "--manifest"])
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse manifest JSON"));
}

#[test]
fn test_prefetch_rejects_out_of_range_manifest_values() {
    let dir = TempDir::new().unwrap();
    let manifest = write(&dir, "composer.json", r#"{"config": {"max-nesting": 500}}"#);

    prefetcher()
        .args(["prefetch", "install", "--manifest"])
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("max-nesting"));
}

#[test]
fn test_prefetch_rejects_invalid_operations_file() {
    let dir = TempDir::new().unwrap();
    let manifest = write(&dir, "composer.json", r#"{"repositories": []}"#);
    let operations = write(&dir, "ops.json", r#"[{"job": "explode"}]"#);

    prefetcher()
        .args(["prefetch", "install", "--manifest"])
        .arg(&manifest)
        .arg("--operations")
        .arg(&operations)
        .arg("--cache-dir")
        .arg(dir.path().join("cache"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid operations list"));
}
