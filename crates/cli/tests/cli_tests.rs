//! CLI integration tests

use std::process::Command;

fn agentctl() -> Command {
    Command::new(env!("CARGO_BIN_EXE_agentctl"))
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = agentctl()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("monitoring agent operator"),
        "Should show app description"
    );
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("render"), "Should show render command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = agentctl()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("agentctl"), "Should show binary name");
}

/// Test status subcommand help
#[test]
fn test_status_help() {
    let output = agentctl()
        .args(["status", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Status help should succeed");
    assert!(
        stdout.contains("--namespace"),
        "Should show namespace option"
    );
}

/// Test that render prints the bundles of a manifest as JSON
#[test]
fn test_render_infraviz_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("infraviz.json");
    std::fs::write(
        &manifest,
        r#"{
            "apiVersion": "monitoring.agents.dev/v1alpha1",
            "kind": "InfraViz",
            "metadata": {"name": "viz", "namespace": "monitoring"},
            "spec": {"controllerUrl": "https://controller.example.com", "account": "customer1"}
        }"#,
    )
    .unwrap();

    let output = agentctl()
        .env("HOME", dir.path())
        .args(["--format", "json", "render"])
        .arg(&manifest)
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "Render should succeed");
    let bundles: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(bundles[0]["config_map"], "infra-viz-config");
    let content = bundles[0]["content"].as_str().unwrap();
    assert!(content.contains("controller-host: controller.example.com"));
    assert!(content.contains("controller-ssl-enabled: true"));
}

/// Test that render fails on a missing file
#[test]
fn test_render_missing_manifest() {
    let output = agentctl()
        .args(["render", "/nonexistent/manifest.json"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Render of a missing file should fail");
}
