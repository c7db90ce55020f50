//! Drives the real binary: as an isolated plugin and through its CLI

use std::path::PathBuf;
use std::process::Command;

use oxide_engine::plugin::{DriverRegistry, LaunchMode, Launcher, PluginProcess};
use oxide_engine::rpc::{CallTimeouts, DriverClient};
use oxide_engine::types::{Capability, Driver, DriverOptions};
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_oxide-engine");

fn engine(state_dir: &TempDir) -> Command {
    let mut command = Command::new(BIN);
    command
        .current_dir(state_dir.path())
        .env("OXIDE_ENGINE_STATE_DIR", state_dir.path().join("state"))
        .env("RUST_LOG", "oxide_engine=warn");
    command
}

#[tokio::test]
async fn test_serve_plugin_prints_a_dialable_address() {
    let (process, addr) = PluginProcess::spawn(BIN, "import").await.unwrap();
    assert!(addr.starts_with("127.0.0.1:"));

    let client = DriverClient::connect("import", &addr, CallTimeouts::default())
        .await
        .unwrap();
    assert!(client.capabilities().has(Capability::GetVersion));

    process.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_serve_plugin_unknown_driver_prints_empty_line() {
    let (_process, addr) = PluginProcess::spawn(BIN, "aks").await.unwrap();
    assert_eq!(addr, "");
}

#[tokio::test]
async fn test_isolated_launcher_runs_driver_in_child() {
    let launcher = Launcher::new(DriverRegistry::builtin()).with_mode(LaunchMode::Subprocess {
        program: PathBuf::from(BIN),
    });
    let plugin = launcher.connect("import").await.unwrap();
    let driver = plugin.driver();

    let opts = DriverOptions::new()
        .with_string("name", "demo")
        .with_string("endpoint", "10.0.0.1:6443")
        .with_int("node-count", 4);
    let info = driver.create(&opts).await.unwrap();
    assert_eq!(info.endpoint, "https://10.0.0.1:6443");
    assert_eq!(driver.get_cluster_size(&info).await.unwrap().count, 4);
}

#[test]
fn test_cli_lifecycle() {
    let dir = TempDir::new().unwrap();

    let status = engine(&dir)
        .args([
            "create",
            "demo",
            "--driver",
            "import",
            "--set",
            "endpoint=10.0.0.1:6443",
            "--set",
            "service-account-token=secret-token",
        ])
        .status()
        .unwrap();
    assert!(status.success());

    let record = dir
        .path()
        .join("state")
        .join("clusters")
        .join("demo")
        .join("config.json");
    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&record).unwrap()).unwrap();
    assert_eq!(stored["status"], "Running");
    assert_eq!(stored["endpoint"], "https://10.0.0.1:6443");

    let output = engine(&dir).args(["inspect", "demo"]).output().unwrap();
    assert!(output.status.success());
    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["serviceAccountToken"], "Redacted");

    let output = engine(&dir).arg("ls").output().unwrap();
    let listing = String::from_utf8(output.stdout).unwrap();
    assert!(listing.contains("demo"));
    assert!(listing.contains("Running"));

    let status = engine(&dir)
        .args(["update", "demo", "--set", "endpoint=10.9.9.9:6443"])
        .status()
        .unwrap();
    assert!(!status.success());
    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&record).unwrap()).unwrap();
    assert_eq!(stored["endpoint"], "https://10.0.0.1:6443");

    let status = engine(&dir).args(["rm", "demo"]).status().unwrap();
    assert!(status.success());
    assert!(!record.exists());
}

#[test]
fn test_cli_rejects_unknown_option() {
    let dir = TempDir::new().unwrap();
    let status = engine(&dir)
        .args([
            "create",
            "demo",
            "--driver",
            "import",
            "--set",
            "region=eu-west-1",
        ])
        .status()
        .unwrap();
    assert!(!status.success());

    // Option resolution happens after PreCreating is recorded
    let record = dir
        .path()
        .join("state")
        .join("clusters")
        .join("demo")
        .join("config.json");
    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&record).unwrap()).unwrap();
    assert_eq!(stored["status"], "Error");
}
