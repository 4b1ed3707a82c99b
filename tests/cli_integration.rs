//! Integration tests for the prospector CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the prospector binary
fn prospector() -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("prospector"));
    cmd.env_remove("PROSPECTOR_SENDER")
        .env_remove("PROSPECTOR_DAILY_EMAIL_CAP")
        .env_remove("RUST_LOG");
    cmd
}

fn in_project(temp: &TempDir) -> Command {
    let mut cmd = prospector();
    cmd.arg("--project").arg(temp.path());
    cmd
}

const BUSINESSES: &str = r#"[
  {"provider_id": "place-1", "name": "Smile Dental", "industry": "dentist",
   "city": "Austin", "state": "TX", "email": "office@smile.example.com"},
  {"provider_id": "place-2", "name": "Bright Teeth", "industry": "dentist",
   "city": "Austin", "state": "TX", "email": "hello@brightteeth.example.com"},
  {"provider_id": "place-3", "name": "Hill Country Plumbing", "industry": "plumber",
   "city": "Austin", "state": "TX", "email": "jobs@hcplumbing.example.com"},
  {"provider_id": "place-4", "name": "Alamo Smiles", "industry": "dentist",
   "city": "San Antonio", "state": "TX", "email": "front@alamosmiles.example.com"}
]"#;

/// Initialise a project with a sender and the sample businesses.
fn initialised() -> TempDir {
    let temp = TempDir::new().unwrap();
    in_project(&temp)
        .args(["init", "--sender", "hello@prospector.example.com"])
        .assert()
        .success();
    std::fs::write(temp.path().join(".prospector/businesses.json"), BUSINESSES).unwrap();
    temp
}

#[test]
fn test_help() {
    prospector()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Autonomous outreach engine"));
}

#[test]
fn test_version() {
    prospector()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_init_creates_state() {
    let temp = TempDir::new().unwrap();

    in_project(&temp).arg("init").assert().success();

    let state = temp.path().join(".prospector");
    assert!(state.join("config.toml").exists());
    assert!(state.join("strategy.json").exists());
    assert!(state.join("businesses.json").exists());
    assert!(state.join("leads.db").exists());
}

#[test]
fn test_init_keeps_existing_config() {
    let temp = initialised();
    let config = temp.path().join(".prospector/config.toml");
    let before = std::fs::read_to_string(&config).unwrap();

    in_project(&temp)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("--force"));

    assert_eq!(std::fs::read_to_string(&config).unwrap(), before);
}

#[test]
fn test_strategy_show_lists_phases() {
    let temp = initialised();

    in_project(&temp)
        .args(["strategy", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Local Launch"))
        .stdout(predicate::str::contains("Regional Growth"));
}

#[test]
fn test_strategy_show_json() {
    let temp = initialised();

    let output = in_project(&temp)
        .args(["strategy", "show", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["current_phase"], 1);
    assert_eq!(json["phases"].as_array().unwrap().len(), 3);
}

#[test]
fn test_discover_then_tick_writes_outbox() {
    let temp = initialised();

    in_project(&temp)
        .arg("discover")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 new"));

    // 2025-03-05 is a Wednesday
    in_project(&temp)
        .args(["tick", "--at", "2025-03-05 10:00"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 sent"));

    let outbox = std::fs::read_to_string(temp.path().join(".prospector/outbox.jsonl")).unwrap();
    assert_eq!(outbox.lines().count(), 2);
    assert!(outbox.contains("office@smile.example.com"));
    assert!(!outbox.contains("jobs@hcplumbing.example.com"));

    in_project(&temp)
        .args(["leads", "list", "--status", "contacted"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Smile Dental"))
        .stdout(predicate::str::contains("2 contacted"));
}

#[test]
fn test_weekend_tick_sends_nothing() {
    let temp = initialised();
    in_project(&temp).arg("discover").assert().success();

    let output = in_project(&temp)
        .args(["tick", "--at", "2025-03-08T10:00:00Z", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["outcome"]["kind"], "outside_window");
    assert_eq!(report["sent"], 0);
    assert!(!temp.path().join(".prospector/outbox.jsonl").exists());
}

#[test]
fn test_tick_without_sender_fails() {
    let temp = TempDir::new().unwrap();
    in_project(&temp).arg("init").assert().success();

    in_project(&temp)
        .args(["tick", "--at", "2025-03-05 10:00"])
        .assert()
        .failure()
        .code(7)
        .stderr(predicate::str::contains("outreach.sender_address"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp = initialised();
    std::fs::write(
        temp.path().join(".prospector/config.toml"),
        "[outreach]\nbatch_size = 0\n",
    )
    .unwrap();

    in_project(&temp)
        .arg("status")
        .assert()
        .failure()
        .code(7)
        .stderr(predicate::str::contains("invalid"));
}

#[test]
fn test_window_reports_weekend_closed() {
    let temp = initialised();

    in_project(&temp)
        .args(["window", "--at", "2025-03-08 10:00"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Closed:"));
}

#[test]
fn test_leads_import_and_mark() {
    let temp = initialised();
    let file = temp.path().join("extra.json");
    std::fs::write(&file, BUSINESSES).unwrap();

    in_project(&temp)
        .arg("leads")
        .arg("import")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("4 imported, 4 new"));

    let output = in_project(&temp)
        .args(["leads", "list", "--json"])
        .output()
        .unwrap();
    let leads: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let key = leads
        .as_array()
        .unwrap()
        .iter()
        .find(|l| l["name"] == "Bright Teeth")
        .map(|l| l["dedup_key"].as_str().unwrap().to_string())
        .unwrap();

    in_project(&temp)
        .args(["leads", "mark", key.as_str(), "contacted"])
        .assert()
        .success();

    in_project(&temp)
        .args(["leads", "mark", key.as_str(), "new"])
        .assert()
        .failure();
}

#[test]
fn test_mark_unknown_lead_fails() {
    let temp = initialised();

    in_project(&temp)
        .args(["leads", "mark", "nope", "converted"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Lead not found"));
}

#[test]
fn test_status_json() {
    let temp = initialised();

    let output = in_project(&temp).args(["status", "--json"]).output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["phase"]["phase"], 1);
    assert_eq!(report["customers"], 0);
}

#[test]
fn test_health_probe_without_snapshot_fails() {
    let temp = initialised();

    in_project(&temp)
        .args(["health", "--probe"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("missing"));

    in_project(&temp).arg("health").assert().success();

    in_project(&temp)
        .args(["health", "--probe"])
        .assert()
        .success();
}

#[test]
fn test_escalate_legal_threat() {
    let temp = initialised();

    in_project(&temp)
        .args([
            "escalate",
            "--subject",
            "Cease and desist",
            "--body",
            "Our attorney will file a lawsuit unless you stop.",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Escalated:"));
}

#[test]
fn test_missing_project_dir() {
    prospector()
        .args(["--project", "/definitely/not/here", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
