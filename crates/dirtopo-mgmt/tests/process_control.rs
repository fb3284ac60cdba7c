//! Integration tests for local start/stop against scripted control programs.

#![cfg(unix)]

use dirtopo_mgmt::{ControlOutcome, ServerCommand, ServerControl};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Lay out `slapd-<instance>` with an error log and the given control script.
fn instance(root: &Path, name: &str, script: &str, body: &str) -> ServerControl {
    let dir = root.join(format!("slapd-{}", name));
    std::fs::create_dir_all(dir.join("logs")).unwrap();
    std::fs::write(dir.join("logs/errors"), "[old] - slapd started.\n").unwrap();
    let path = dir.join(script);
    std::fs::write(&path, format!("#!/bin/sh\nLOG=\"{}\"\n{}\n", dir.join("logs/errors").display(), body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    ServerControl::new(root, name)
        .with_timeout(Duration::from_secs(10))
        .with_poll_interval(Duration::from_millis(50))
}

#[tokio::test]
async fn test_start_waits_for_new_marker() {
    let root = TempDir::new().unwrap();
    let control = instance(
        root.path(),
        "m1",
        "start-slapd",
        "echo '[now] - starting up' >> \"$LOG\"\necho '[now] - slapd started.  Listening on All Interfaces port 389' >> \"$LOG\"",
    );

    let outcome = control.run(ServerCommand::Start, &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, ControlOutcome::Completed { invocations: 1 });
}

#[tokio::test]
async fn test_initialization_failure_reinvokes() {
    let root = TempDir::new().unwrap();
    let control = instance(
        root.path(),
        "m1",
        "start-slapd",
        "DIR=$(dirname \"$0\")\nif [ -f \"$DIR/tried\" ]; then\n  echo '[now] - slapd started.' >> \"$LOG\"\nelse\n  touch \"$DIR/tried\"\n  echo '[now] - Initialization Failed' >> \"$LOG\"\nfi",
    );

    let outcome = control.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, ControlOutcome::Completed { invocations: 2 });
}

#[tokio::test]
async fn test_port_conflict_aborts() {
    let root = TempDir::new().unwrap();
    let control = instance(
        root.path(),
        "m1",
        "start-slapd",
        "echo '[now] - binding to port 389' >> \"$LOG\"\necho '[now] - PR_Bind() on All Interfaces port 389 failed' >> \"$LOG\"",
    );

    let outcome = control.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        ControlOutcome::PortConflict {
            last_line: Some("[now] - binding to port 389".to_string())
        }
    );
}

#[tokio::test]
async fn test_silent_stop_times_out() {
    let root = TempDir::new().unwrap();
    let control = instance(root.path(), "m1", "stop-slapd", "exit 0")
        .with_timeout(Duration::from_millis(300));

    let outcome = control.stop(&CancellationToken::new()).await.unwrap();
    match outcome {
        ControlOutcome::TimedOut { elapsed, last_line } => {
            assert!(elapsed >= Duration::from_millis(300));
            assert_eq!(last_line, None);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_while_waiting() {
    let root = TempDir::new().unwrap();
    let control = instance(root.path(), "m1", "stop-slapd", "exit 0");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let outcome = control.stop(&cancel).await.unwrap();
    assert_eq!(outcome, ControlOutcome::Cancelled);
}
