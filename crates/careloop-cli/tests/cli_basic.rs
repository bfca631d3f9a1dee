//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own temporary data directory.

use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(data_dir: &TempDir, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_careloop-cli"))
        .env("CARELOOP_DATA_DIR", data_dir.path())
        .env("CARELOOP_LOG", "warn")
        .args(args)
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_json(data_dir: &TempDir, args: &[&str]) -> Value {
    let (stdout, stderr, code) = run_cli(data_dir, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("Failed to parse JSON output")
}

fn add_member(dir: &TempDir, id: &str, extra: &[&str]) {
    let mut args = vec![
        "member",
        "add",
        id,
        "--name",
        id,
        "--email",
        "someone@example.com",
        "--capabilities",
        "health",
    ];
    args.extend_from_slice(extra);
    run_json(dir, &args);
}

fn create_medication_reminder(dir: &TempDir, escalate_to: &str) -> String {
    let reminder = run_json(
        dir,
        &[
            "reminder",
            "create",
            "Take medication",
            "--category",
            "medication",
            "--frequency",
            "daily",
            "--time",
            "08:00",
            "--start",
            "2024-01-01",
            "--escalate-to",
            escalate_to,
            "--delay",
            "30",
        ],
    );
    reminder["id"].as_str().unwrap().to_string()
}

#[test]
fn test_missed_reminder_escalates_once() {
    let dir = TempDir::new().unwrap();
    add_member(&dir, "m1", &[]);
    add_member(&dir, "m2", &["--no-alerts"]);
    create_medication_reminder(&dir, "m1,m2");

    let fired = run_json(&dir, &["tick", "--now", "2024-01-02T08:00:00Z", "--no-dispatch"]);
    assert_eq!(fired["fired"], 1);
    assert_eq!(fired["alerts_created"], 0);

    let escalated = run_json(&dir, &["tick", "--now", "2024-01-02T08:30:00Z", "--no-dispatch"]);
    assert_eq!(escalated["alerts_created"], 1);
    let alert_id = escalated["alert_ids"][0].as_str().unwrap().to_string();

    let again = run_json(&dir, &["tick", "--now", "2024-01-02T08:31:00Z", "--no-dispatch"]);
    assert_eq!(again["alerts_created"], 0);

    let alert = run_json(&dir, &["alert", "get", &alert_id]);
    assert_eq!(alert["targets"], serde_json::json!(["m1"]));

    let acked = run_json(&dir, &["alert", "ack", &alert_id, "m1"]);
    assert_eq!(acked["acknowledged_by"], serde_json::json!(["m1"]));
}

#[test]
fn test_resolve_before_deadline_prevents_alert() {
    let dir = TempDir::new().unwrap();
    add_member(&dir, "m1", &[]);
    let reminder_id = create_medication_reminder(&dir, "m1");

    run_json(&dir, &["tick", "--now", "2024-01-02T08:00:00Z", "--no-dispatch"]);
    let resolved = run_json(
        &dir,
        &[
            "resolve",
            &reminder_id,
            "2024-01-02T08:00:00Z",
            "--at",
            "2024-01-02T08:15:00Z",
        ],
    );
    assert_eq!(resolved["outcome"], "resolved");

    let later = run_json(&dir, &["tick", "--now", "2024-01-02T09:00:00Z", "--no-dispatch"]);
    assert_eq!(later["alerts_created"], 0);
    assert_eq!(run_json(&dir, &["alert", "list"]), serde_json::json!([]));
}

#[test]
fn test_resolve_rejects_non_occurrence() {
    let dir = TempDir::new().unwrap();
    let reminder_id = create_medication_reminder(&dir, "");
    let (_, stderr, code) = run_cli(&dir, &["resolve", &reminder_id, "2024-01-02T08:07:00Z"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("error"));
}

#[test]
fn test_reminder_next() {
    let dir = TempDir::new().unwrap();
    let reminder_id = create_medication_reminder(&dir, "");
    let next = run_json(
        &dir,
        &[
            "reminder",
            "next",
            &reminder_id,
            "--count",
            "2",
            "--after",
            "2024-01-02T09:00:00Z",
        ],
    );
    assert_eq!(
        next,
        serde_json::json!(["2024-01-03T08:00:00Z", "2024-01-04T08:00:00Z"])
    );
}

#[test]
fn test_member_without_permission_cannot_create() {
    let dir = TempDir::new().unwrap();
    add_member(&dir, "viewer", &[]);
    let (_, stderr, code) = run_cli(
        &dir,
        &[
            "reminder",
            "create",
            "Walk",
            "--as-member",
            "viewer",
        ],
    );
    assert_ne!(code, 0);
    assert!(stderr.contains("viewer"), "unexpected stderr: {stderr}");
}

#[test]
fn test_manual_alert_defaults_to_everyone_eligible() {
    let dir = TempDir::new().unwrap();
    add_member(&dir, "m1", &[]);
    add_member(&dir, "m2", &["--no-alerts"]);
    let alert = run_json(
        &dir,
        &[
            "alert",
            "generate",
            "--type",
            "streak_milestone",
            "--title",
            "7 day streak",
            "--message",
            "A full week of check-ins",
        ],
    );
    assert_eq!(alert["targets"], serde_json::json!(["m1"]));
    assert_eq!(alert["alert_type"], "streak_milestone");
}

#[test]
fn test_config_set_get() {
    let dir = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(&dir, &["config", "set", "dispatch.max_attempts", "5"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "ok");

    let (stdout, _, code) = run_cli(&dir, &["config", "get", "dispatch.max_attempts"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "5");

    let (_, _, code) = run_cli(&dir, &["config", "get", "dispatch.nope"]);
    assert_ne!(code, 0);
    assert!(dir.path().join("config.toml").exists());
}

#[test]
fn test_tick_reports_alerts_when_transport_is_misconfigured() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[transport]\nemail_webhook_url = \"not a url\"\n",
    )
    .unwrap();
    add_member(&dir, "m1", &[]);
    create_medication_reminder(&dir, "m1");

    run_json(&dir, &["tick", "--now", "2024-01-02T08:00:00Z", "--no-dispatch"]);
    let escalated = run_json(&dir, &["tick", "--now", "2024-01-02T08:30:00Z"]);
    assert_eq!(escalated["alerts_created"], 1);
    assert_eq!(escalated["dispatches"], serde_json::json!([]));

    let alert_id = escalated["alert_ids"][0].as_str().unwrap();
    let alert = run_json(&dir, &["alert", "get", alert_id]);
    assert_eq!(alert["status"], "unacknowledged");
}

#[test]
fn test_alert_status_follows_acknowledgment() {
    let dir = TempDir::new().unwrap();
    add_member(&dir, "m1", &[]);
    let alert = run_json(
        &dir,
        &[
            "alert",
            "generate",
            "--title",
            "Check in",
            "--message",
            "Quiet day today",
        ],
    );
    assert_eq!(alert["status"], "unacknowledged");
    let alert_id = alert["id"].as_str().unwrap();

    let acked = run_json(&dir, &["alert", "ack", alert_id, "m1"]);
    assert_eq!(acked["status"], "acknowledged");

    let listed = run_json(&dir, &["alert", "list"]);
    assert_eq!(listed[0]["status"], "acknowledged");
}
