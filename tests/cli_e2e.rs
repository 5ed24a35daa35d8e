use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn fixture(name: &str) -> String {
    fs::read_to_string(
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name),
    )
    .expect("fixture")
}

fn run_cli(repo: &Path, home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_switchmap"))
        .current_dir(repo)
        .env("HOME", home)
        .env_remove("SWITCHMAP_LOG")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("command runs")
}

fn run_json(repo: &Path, home: &Path, args: &[&str]) -> Value {
    let output = run_cli(repo, home, args);
    assert!(
        output.status.success(),
        "command failed: args={args:?}\nstdout={}\nstderr={}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json stdout")
}

fn error_code(output: &Output) -> String {
    assert!(!output.status.success(), "command unexpectedly succeeded");
    let payload: Value = serde_json::from_slice(
        output
            .stderr
            .split(|byte| *byte == b'\n')
            .rev()
            .find(|line| line.starts_with(b"{"))
            .expect("json error line"),
    )
    .expect("json stderr");
    payload["error"]["code"]
        .as_str()
        .expect("error code")
        .to_string()
}

fn seed_captures(repo: &Path) {
    let dir = repo.join("captures");
    fs::create_dir_all(&dir).expect("captures dir");
    for name in ["Core-A_20231228_1430.log", "Agg-2_20231228_0900.log"] {
        fs::write(dir.join(name), fixture(name)).expect("seed capture");
    }
}

#[test]
fn commands_require_init() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = tempfile::tempdir().expect("home");
    let output = run_cli(temp.path(), home.path(), &["devices"]);
    assert_eq!(error_code(&output), "not_initialized");
}

#[test]
fn import_detect_topology_and_history() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = tempfile::tempdir().expect("home");
    let repo = temp.path();
    seed_captures(repo);

    let init = run_json(repo, home.path(), &["init"]);
    assert_eq!(init["status"], "ok");
    assert_eq!(init["mode"], "repo");
    assert!(repo.join(".switchmap/config.yml").is_file());

    let import = run_json(repo, home.path(), &["import", "captures", "--detect"]);
    assert_eq!(import["status"], "ok");
    assert_eq!(import["scanned_inputs"], 2);
    assert_eq!(import["imported"], 2);
    assert_eq!(import["failure_count"], 0);
    let kinds = import["anomalies"]
        .as_array()
        .expect("anomalies")
        .iter()
        .map(|anomaly| anomaly["kind"].as_str().expect("kind").to_string())
        .collect::<Vec<_>>();
    assert!(kinds.contains(&"suspect_loop".to_string()));
    assert!(kinds.contains(&"trunk_inconsistent".to_string()));

    let again = run_json(repo, home.path(), &["import", "captures/*.log"]);
    assert_eq!(again["imported"], 0);
    assert_eq!(again["skipped_duplicates"], 2);

    let devices = run_json(repo, home.path(), &["devices"]);
    let names = devices["devices"]
        .as_array()
        .expect("devices")
        .iter()
        .map(|device| device["name"].as_str().expect("name"))
        .collect::<Vec<_>>();
    assert!(names.contains(&"Core-A"));
    assert!(names.contains(&"CoreB"));

    let topology = run_json(repo, home.path(), &["topology", "Core-A", "--max-links", "1"]);
    let edges = topology["edges"].as_array().expect("edges");
    assert_eq!(edges[0]["kind"], "aggregated");
    assert_eq!(edges[0]["dst_device"], "CoreB");
    assert_eq!(edges.len(), 2);
    assert_eq!(topology["truncated_physical"], 2);

    let stored = run_json(
        repo,
        home.path(),
        &["anomalies", "--device", "Agg-2", "--stored", "--severity", "warning"],
    );
    assert_eq!(stored["count"], 1);
    assert_eq!(stored["anomalies"][0]["kind"], "trunk_inconsistent");

    let history = run_json(repo, home.path(), &["history", "--limit", "5"]);
    let imports = history["imports"].as_array().expect("imports");
    assert_eq!(imports.len(), 2);
    let hash = imports[0]["content_hash"].as_str().expect("hash").to_string();

    let shown = run_json(repo, home.path(), &["show-capture", &hash]);
    assert_eq!(shown["import"]["content_hash"], hash.as_str());
    assert!(shown["text"].as_str().expect("text").contains("display lldp neighbor"));
    let raw = run_cli(repo, home.path(), &["show-capture", &hash, "--raw"]);
    assert!(raw.status.success());
    assert!(String::from_utf8_lossy(&raw.stdout).starts_with('<'));
}

#[test]
fn mark_and_describe_report_unknown_targets() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = tempfile::tempdir().expect("home");
    let repo = temp.path();
    seed_captures(repo);
    run_json(repo, home.path(), &["init"]);
    run_json(repo, home.path(), &["ingest"]);

    let marked = run_json(
        repo,
        home.path(),
        &["mark", "Core-A", "GE1/0/5", "Access-5", "GE0/0/24", "ignore", "--notes", "lab"],
    );
    assert_eq!(marked["link"]["confidence"], "ignore");
    assert_eq!(marked["link"]["confidence_source"], "manual");

    let missing = run_cli(
        repo,
        home.path(),
        &["mark", "Core-A", "GE1/0/9", "Nowhere", "GE0/0/1", "suspect"],
    );
    assert_eq!(error_code(&missing), "link_not_found");

    let bad = run_cli(
        repo,
        home.path(),
        &["mark", "Core-A", "GE1/0/5", "Access-5", "GE0/0/24", "maybe"],
    );
    assert_eq!(error_code(&bad), "invalid_confidence");

    let described = run_json(
        repo,
        home.path(),
        &["describe", "Core-A", "ge1/0/5", "closet 2"],
    );
    assert_eq!(described["interface"]["description"], "closet 2");
    let unknown = run_cli(repo, home.path(), &["describe", "Core-Z", "GE1/0/5", "x"]);
    assert_eq!(error_code(&unknown), "device_not_found");

    let detail = run_json(repo, home.path(), &["device", "Core-A"]);
    assert_eq!(detail["device"]["name"], "Core-A");
    let missing_device = run_cli(repo, home.path(), &["device", "Nope"]);
    assert_eq!(error_code(&missing_device), "device_not_found");
}

#[test]
fn unreadable_capture_makes_batch_partial() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = tempfile::tempdir().expect("home");
    let repo = temp.path();
    seed_captures(repo);
    fs::write(repo.join("captures/broken.log"), [0xff, 0xfe, 0x00, 0xd8, 0x00]).expect("seed");
    run_json(repo, home.path(), &["init"]);

    let import = run_json(repo, home.path(), &["import", "captures"]);
    assert_eq!(import["status"], "partial");
    assert_eq!(import["imported"], 2);
    assert_eq!(import["failure_count"], 1);
    assert_eq!(import["failures"][0]["code"], "encoding_error");
}

#[test]
fn failed_detection_still_reports_committed_imports() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = tempfile::tempdir().expect("home");
    let repo = temp.path();
    seed_captures(repo);
    run_json(repo, home.path(), &["init"]);

    let conn = rusqlite::Connection::open(repo.join(".switchmap/switchmap.sqlite")).expect("db");
    conn.execute_batch(
        "CREATE TRIGGER frozen_anomalies BEFORE INSERT ON anomalies
         BEGIN SELECT RAISE(ABORT, 'anomalies are frozen'); END;",
    )
    .expect("trigger");
    drop(conn);

    let import = run_json(repo, home.path(), &["import", "captures", "--detect"]);
    assert_eq!(import["status"], "partial");
    assert_eq!(import["imported"], 2);
    assert_eq!(import["results"].as_array().expect("results").len(), 2);
    let failures = import["failures"].as_array().expect("failures");
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|failure| failure["code"] == "sqlite_error"));
    assert!(failures.iter().any(|failure| failure["device"] == "Core-A"));

    let history = run_json(repo, home.path(), &["history"]);
    assert_eq!(history["imports"].as_array().expect("imports").len(), 2);
}
