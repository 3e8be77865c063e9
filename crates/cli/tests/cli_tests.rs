//! CLI integration tests

use std::process::{Command, Output};

fn watchdogctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_watchdogctl"))
        .args(args)
        .env_remove("WATCHDOG_API_URL")
        .output()
        .expect("Failed to execute command")
}

#[test]
fn test_cli_help() {
    let output = watchdogctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Cosmos throughput watchdog"), "Should show about text");
    assert!(stdout.contains("run"), "Should show run command");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("classify"), "Should show classify command");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
}

#[test]
fn test_cli_version() {
    let output = watchdogctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("watchdogctl"), "Should show binary name");
}

#[test]
fn test_run_help() {
    let output = watchdogctl(&["run", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Run help should succeed");
    assert!(stdout.contains("--json"), "Should show json option");
}

#[test]
fn test_classify_help() {
    let output = watchdogctl(&["classify", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Classify help should succeed");
    assert!(stdout.contains("--tag"), "Should show tag option");
}

#[test]
fn test_classify_json_by_name() {
    let output = watchdogctl(&["--format", "json", "classify", "inventory-qa"]);
    assert!(output.status.success(), "Classify should succeed offline");

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["account"], "inventory-qa");
    assert_eq!(result["non_production"], true);
    assert_eq!(result["decided_by"], "name");
}

#[test]
fn test_classify_json_by_tag() {
    let output = watchdogctl(&[
        "--format",
        "json",
        "classify",
        "inventory",
        "--tag",
        "CosmosDBAutoScaleCategory=NonProd",
    ]);
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["non_production"], true);
    assert_eq!(result["decided_by"], "tag");
}

#[test]
fn test_classify_rejects_malformed_tag() {
    let output = watchdogctl(&["classify", "inventory", "--tag", "no-separator"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Malformed tag should fail");
    assert!(stderr.contains("key=value"));
}

#[test]
fn test_invalid_format_fails() {
    let output = watchdogctl(&["--format", "yaml", "status"]);
    assert!(!output.status.success(), "Unknown format should fail");
}
