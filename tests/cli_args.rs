//! Integration tests for the readthru binary
//!
//! Runs the CLI against a fixture document store and a temporary file-backed
//! cache, and checks that repeat runs are answered from the cache.

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const FIXTURE: &str = r#"{
    "users": [
        {"_id": "u1", "gender": "F"},
        {"_id": "u2", "gender": "M"},
        {"_id": "u3", "gender": "F"}
    ],
    "health_records": [
        {"_id": "h1", "user_id": "u1", "weight": 64.0},
        {"_id": "h2", "user_id": "u2", "weight": 78.9},
        {"_id": "h3", "user_id": "u3", "weight": 66.4},
        {"_id": "h4", "user_id": "u1", "weight": 65.0}
    ]
}"#;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_readthru"))
        .args(args)
        .env_remove("READTHRU_DATA")
        .env_remove("READTHRU_CACHE_DIR")
        .env_remove("READTHRU_REDIS_URL")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute readthru")
}

/// Writes the fixture and returns `(data path, cache dir)` as strings
fn setup(dir: &TempDir) -> (String, String) {
    let data = dir.path().join("store.json");
    fs::write(&data, FIXTURE).expect("Should write fixture");
    let cache = dir.path().join("cache");
    (path_str(&data), path_str(&cache))
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "Expected success, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(
        output.status.success(),
        "Expected --help to exit successfully"
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("readthru"), "Help should mention readthru");
    assert!(stdout.contains("avg-weight"), "Help should list avg-weight");
    assert!(stdout.contains("health-records"), "Help should list health-records");
}

#[test]
fn test_avg_weight_prints_groups() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let (data, cache) = setup(&dir);

    let output = run_cli(&["--data", &data, "--cache-dir", &cache, "avg-weight"]);
    let rows = stdout_json(&output);

    let rows = rows.as_array().expect("array of rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["gender"], "F");
    assert!((rows[0]["avgWeight"].as_f64().unwrap() - 65.133_333_333).abs() < 1e-6);
    assert_eq!(rows[1]["gender"], "M");
    assert!((rows[1]["avgWeight"].as_f64().unwrap() - 78.9).abs() < 1e-9);
}

#[test]
fn test_second_run_is_served_from_cache() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let (data, cache) = setup(&dir);

    let first = stdout_json(&run_cli(&["--data", &data, "--cache-dir", &cache, "avg-weight"]));

    // With the document store gone only the cache can answer
    fs::remove_file(&data).expect("Should remove fixture");
    let second = stdout_json(&run_cli(&["--data", &data, "--cache-dir", &cache, "avg-weight"]));

    assert_eq!(first, second);
    assert!(Path::new(&cache).join("averageWeightByGender.json").exists());
}

#[test]
fn test_health_records_round_trip_through_fan_out_cache() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let (data, cache) = setup(&dir);
    let args = ["--data", &data, "--cache-dir", &cache, "health-records", "u1"];

    let first = stdout_json(&run_cli(&args));
    fs::remove_file(&data).expect("Should remove fixture");
    let second = stdout_json(&run_cli(&args));

    assert_eq!(first, second);
    let records = second.as_array().expect("array of records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["_id"], "h1");
    assert_eq!(records[1]["_id"], "h4");
    assert!(Path::new(&cache).join("health_records%3Au1%3Acached.json").exists());
}

#[test]
fn test_missing_data_file_fails() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let missing = path_str(&dir.path().join("absent.json"));
    let cache = path_str(&dir.path().join("cache"));

    let output = run_cli(&["--data", &missing, "--cache-dir", &cache, "avg-weight"]);

    assert!(!output.status.success(), "Expected a missing store to fail");
    assert!(output.stdout.is_empty(), "Nothing should be printed on failure");
}

#[test]
fn test_zero_ttl_is_rejected() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let (data, cache) = setup(&dir);

    let output = run_cli(&["--data", &data, "--cache-dir", &cache, "--ttl", "0", "avg-weight"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("InvalidTtl"), "stderr: {}", stderr);
}

#[test]
fn test_missing_subcommand_fails() {
    let output = run_cli(&["--data", "store.json"]);
    assert!(!output.status.success());
}
