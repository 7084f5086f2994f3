// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gantry_core::HostSpec;
use std::time::Duration;

fn localhost() -> Host {
    Host::from_spec(HostSpec::Localhost)
}

fn config(command: &str, root: &std::path::Path) -> serde_json::Value {
    serde_json::json!({
        "command": command,
        "playground_root": root.to_string_lossy(),
    })
}

async fn poll_until_terminal(backend: &ProcessBackend, rp: &RunParameters, host: &Host) -> Update {
    for _ in 0..100 {
        match backend.update(rp, host).await.unwrap() {
            Update::StillRunning(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            terminal => return terminal,
        }
    }
    panic!("job did not terminate in time");
}

#[tokio::test]
async fn echo_job_succeeds_with_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ProcessBackend::new();
    let host = localhost();

    let created = backend.create(config("echo ok", dir.path())).unwrap();
    let running = match backend.start(&created, &host).await {
        StartOutcome::Started(rp) => rp,
        other => panic!("expected start, got {:?}", other),
    };

    match poll_until_terminal(&backend, &running, &host).await {
        Update::Succeeded(_) => {}
        other => panic!("expected success, got {:?}", other),
    }

    let stdout = backend.query(&running, &host, "stdout").await.unwrap();
    assert_eq!(String::from_utf8_lossy(&stdout), "ok\n");
}

#[tokio::test]
async fn failing_job_reports_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ProcessBackend::new();
    let host = localhost();

    let created = backend.create(config("exit 2", dir.path())).unwrap();
    let running = match backend.start(&created, &host).await {
        StartOutcome::Started(rp) => rp,
        other => panic!("expected start, got {:?}", other),
    };

    match poll_until_terminal(&backend, &running, &host).await {
        Update::Failed(_, reason) => assert!(reason.contains("exited 2"), "{reason}"),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn kill_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ProcessBackend::new();
    let host = localhost();

    let created = backend.create(config("sleep 60", dir.path())).unwrap();
    let running = match backend.start(&created, &host).await {
        StartOutcome::Started(rp) => rp,
        other => panic!("expected start, got {:?}", other),
    };

    backend.kill(&running, &host).await.unwrap();
    // Second cancel of an already-dead group is still Ok.
    backend.kill(&running, &host).await.unwrap();

    match poll_until_terminal(&backend, &running, &host).await {
        Update::Failed(_, _) => {}
        Update::Succeeded(_) => panic!("killed job must not succeed"),
        Update::StillRunning(_) => unreachable!(),
    }
}

#[tokio::test]
async fn query_serves_script_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ProcessBackend::new();
    let host = localhost();

    let created = backend.create(config("true", dir.path())).unwrap();
    let running = match backend.start(&created, &host).await {
        StartOutcome::Started(rp) => rp,
        other => panic!("expected start, got {:?}", other),
    };
    poll_until_terminal(&backend, &running, &host).await;

    let script = backend.query(&running, &host, "script").await.unwrap();
    assert!(String::from_utf8_lossy(&script).contains("monitor.log"));

    let log = backend.query(&running, &host, "log").await.unwrap();
    assert!(String::from_utf8_lossy(&log).contains("success"));

    let err = backend.query(&running, &host, "bogus").await.unwrap_err();
    assert!(matches!(err, QueryError::UnknownItem { .. }));
}

#[tokio::test]
async fn update_before_start_is_fatal() {
    let backend = ProcessBackend::new();
    let host = localhost();
    let created = backend
        .create(serde_json::json!({ "command": "true" }))
        .unwrap();
    let err = backend.update(&created, &host).await.unwrap_err();
    assert!(!err.is_recoverable());
}

#[test]
fn create_rejects_missing_command() {
    let backend = ProcessBackend::new();
    let err = backend.create(serde_json::json!({})).unwrap_err();
    assert!(matches!(err, BackendError::Fatal(_)));
}

#[test]
fn future_rp_version_is_fatal() {
    let backend = ProcessBackend::new();
    let rp = RunParameters::new(99, serde_json::json!({}));
    let err = ProcessRp::decode(&rp).unwrap_err();
    assert!(matches!(err, BackendError::Fatal(_)));
    let _ = backend;
}
