//! End-to-end runs of the `stagerun` binary against real shell commands.
#![cfg(unix)]

mod common;

use common::{stderr, stdout, Workspace};
use serde_json::{json, Value};

fn episodes() -> Value {
    json!([
        {"key": "ep-1", "payload": {"title": "Pilot", "show": "Night Shift", "duration_seconds": 1800}},
        {"key": "ep-2", "payload": {"title": "Second Wind", "show": "Night Shift", "duration_seconds": 2400}},
        {"key": "ep-3", "payload": {"title": "Cold Open", "show": "Daybreak", "duration_seconds": 600}}
    ])
}

fn summary(output: &std::process::Output) -> Value {
    serde_json::from_str(&stdout(output)).expect("summary json")
}

#[test]
fn successful_run_marks_every_item_completed() {
    let workspace = Workspace::new(&episodes());
    let output = workspace.run_stage("transcode", "true", &["--workers", "2"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("3 succeeded, 0 failed"));

    let status = workspace.status_json();
    for key in ["ep-1", "ep-2", "ep-3"] {
        assert_eq!(
            status[key]["transcode"]["state"], "completed",
            "{key}: {status}"
        );
    }
    assert_eq!(status["ep-1"]["display_fields"]["show"], "Night Shift");
}

#[test]
fn failing_command_exits_with_processing_error() {
    let workspace = Workspace::new(&episodes());
    let output = workspace.run_stage("transcode", "false", &["--json"]);
    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr(&output));

    let summary = summary(&output);
    assert_eq!(summary["failed"], 3);
    assert_eq!(summary["exit_code"], "processing_error");

    let status = workspace.status_json();
    let record = &status["ep-2"]["transcode"];
    assert_eq!(record["state"], "failed");
    assert!(record["error"]
        .as_str()
        .is_some_and(|error| error.contains("exited with")));
}

#[test]
fn stop_on_error_with_one_worker_skips_the_rest() {
    let workspace = Workspace::new(&episodes());
    let output = workspace.run_stage(
        "transcode",
        "false",
        &["--workers", "1", "--stop-on-error", "--json"],
    );
    assert_eq!(output.status.code(), Some(3));
    let summary = summary(&output);
    assert_eq!(summary["completed"], 1);
    assert_eq!(summary["skipped"], 2);
}

#[test]
fn empty_selection_is_a_user_error() {
    let workspace = Workspace::new(&episodes());
    let output = workspace.run_stage("transcode", "true", &["--name", "no such episode"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("no items matched"));
}

#[test]
fn only_filter_selects_by_recorded_progress() {
    let workspace = Workspace::new(&episodes());
    let mark = workspace.run(&["mark", "ep-1", "export", "complete"]);
    assert!(mark.status.success(), "stderr: {}", stderr(&mark));

    let output = workspace.run_stage("transcode", "true", &["--only", "new", "--json"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(summary(&output)["requested"], 2);
}

#[test]
fn unknown_stage_is_rejected() {
    let workspace = Workspace::new(&episodes());
    let output = workspace.run_stage("upload", "true", &[]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("unknown stage \"upload\""));
}

#[test]
fn export_csv_then_clear_completed() {
    let workspace = Workspace::new(&episodes());
    let run = workspace.run_stage("export", "true", &["--name", "Pilot"]);
    assert_eq!(run.status.code(), Some(0), "stderr: {}", stderr(&run));
    let run = workspace.run_stage("transcode", "true", &["--name", "Cold Open"]);
    assert_eq!(run.status.code(), Some(0), "stderr: {}", stderr(&run));

    let export = workspace.run(&["export", "--out", "status.csv", "--format", "csv"]);
    assert!(export.status.success(), "stderr: {}", stderr(&export));
    let csv = std::fs::read_to_string(workspace.path().join("status.csv")).expect("read csv");
    assert_eq!(
        csv.lines().next(),
        Some("Episode,Show,transcode,transcribe,diarize,analyze,export")
    );
    assert!(csv.contains("Pilot,Night Shift,,,,,completed"), "{csv}");

    let clear = workspace.run(&["clear-completed"]);
    assert!(clear.status.success());
    assert!(stdout(&clear).contains("removed 1"));
    let status = workspace.status_json();
    assert!(status.get("ep-1").is_none());
    assert!(status.get("ep-3").is_some());
}

#[test]
fn status_shows_one_item_or_reports_missing_key() {
    let workspace = Workspace::new(&episodes());
    let mark = workspace.run(&[
        "mark",
        "ep-2",
        "transcribe",
        "fail",
        "--error",
        "model crashed",
    ]);
    assert!(mark.status.success(), "stderr: {}", stderr(&mark));

    let status = workspace.run(&["status", "ep-2"]);
    assert!(status.status.success());
    assert!(stdout(&status).contains("transcribe: failed"));

    let missing = workspace.run(&["status", "ep-9"]);
    assert_eq!(missing.status.code(), Some(1));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let workspace = Workspace::new(&episodes());
    let again = workspace.run(&["init", "--path", "stagerun.json"]);
    assert_eq!(again.status.code(), Some(2));
    let forced = workspace.run(&["init", "--path", "stagerun.json", "--force"]);
    assert!(forced.status.success());
}
