// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gantry_backends::fake::FakeBackend;
use gantry_core::test_support::{long_running_spec, noop_spec};
use gantry_core::{State, TargetSummary, WhatHappened};

fn ctx_in(dir: &tempfile::TempDir, auth_tokens: Vec<String>) -> (Arc<ListenCtx>, mpsc::Receiver<StepRequest>) {
    let store = Store::open(dir.path()).unwrap();
    let command_log = Arc::new(Mutex::new(
        CommandLog::open(&store.command_log_path(), &store.command_offset_path()).unwrap(),
    ));
    let mut registry = BackendRegistry::builtin();
    let (fake, _plan) = FakeBackend::new();
    registry.register(Arc::new(fake));
    let (step_tx, step_rx) = mpsc::channel(4);
    let ctx = Arc::new(ListenCtx {
        store,
        registry,
        command_log,
        auth_tokens,
        nudge: Arc::new(Notify::new()),
        shutdown: Arc::new(Notify::new()),
        step_tx,
        health: Arc::new(Mutex::new(Health::default())),
        start_time: Instant::now(),
    });
    (ctx, step_rx)
}

fn envelope(request: Request) -> Envelope {
    Envelope {
        token: None,
        request,
    }
}

#[tokio::test]
async fn ping_pong() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _step_rx) = ctx_in(&dir, vec![]);
    let response = handle_envelope(envelope(Request::Ping), &ctx).await;
    assert_eq!(response, Response::Pong);
}

#[tokio::test]
async fn auth_is_enforced_when_tokens_are_configured() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _step_rx) = ctx_in(&dir, vec!["sesame".to_string()]);

    let denied = handle_envelope(envelope(Request::Ping), &ctx).await;
    assert!(matches!(denied, Response::Error { .. }));

    let wrong = handle_envelope(
        Envelope {
            token: Some("guess".into()),
            request: Request::Ping,
        },
        &ctx,
    )
    .await;
    assert!(matches!(wrong, Response::Error { .. }));

    let granted = handle_envelope(
        Envelope {
            token: Some("sesame".into()),
            request: Request::Ping,
        },
        &ctx,
    )
    .await;
    assert_eq!(granted, Response::Pong);
}

#[tokio::test]
async fn submit_assigns_ids_and_persists_passive_targets() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _step_rx) = ctx_in(&dir, vec![]);

    let response = handle_envelope(
        envelope(Request::Submit {
            targets: vec![noop_spec("a"), long_running_spec("b", "process", "echo hi")],
        }),
        &ctx,
    )
    .await;

    let Response::Submitted { ids } = response else {
        panic!("expected Submitted, got {:?}", response);
    };
    assert_eq!(ids.len(), 2);
    for id in &ids {
        let target = ctx.store.require(id).unwrap();
        assert_eq!(*target.state(), State::Passive);
    }
}

#[tokio::test]
async fn submit_rejects_unknown_backend_and_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _step_rx) = ctx_in(&dir, vec![]);

    let unknown = handle_envelope(
        envelope(Request::Submit {
            targets: vec![long_running_spec("x", "slurm", "echo")],
        }),
        &ctx,
    )
    .await;
    match unknown {
        Response::Error { message } => assert!(message.contains("unknown backend")),
        other => panic!("expected error, got {:?}", other),
    }

    let mut bad = long_running_spec("x", "process", "echo");
    if let gantry_core::BuildProcess::LongRunning {
        ref mut run_parameters,
        ..
    } = bad.build_process
    {
        run_parameters.payload = serde_json::json!({ "not_command": true });
    }
    let rejected = handle_envelope(
        envelope(Request::Submit {
            targets: vec![bad],
        }),
        &ctx,
    )
    .await;
    match rejected {
        Response::Error { message } => assert!(message.contains("rejected config"), "{message}"),
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn query_filters_summaries() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _step_rx) = ctx_in(&dir, vec![]);

    handle_envelope(
        envelope(Request::Submit {
            targets: vec![noop_spec("build-all"), noop_spec("deploy")],
        }),
        &ctx,
    )
    .await;

    let all = handle_envelope(
        envelope(Request::Query {
            filter: "(all)".into(),
        }),
        &ctx,
    )
    .await;
    let Response::Summaries { targets } = all else {
        panic!("expected summaries");
    };
    assert_eq!(targets.len(), 2);

    let named = handle_envelope(
        envelope(Request::Query {
            filter: "(name (re \"^build\"))".into(),
        }),
        &ctx,
    )
    .await;
    let Response::Summaries { targets } = named else {
        panic!("expected summaries");
    };
    let names: Vec<&str> = targets.iter().map(|t: &TargetSummary| t.name.as_str()).collect();
    assert_eq!(names, vec!["build-all"]);
}

#[tokio::test]
async fn filter_syntax_errors_come_back_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _step_rx) = ctx_in(&dir, vec![]);
    let response = handle_envelope(
        envelope(Request::Query {
            filter: "(banana)".into(),
        }),
        &ctx,
    )
    .await;
    match response {
        Response::Error { message } => {
            assert!(message.contains("syntax error at byte 1"), "{message}");
            assert!(message.contains("banana"));
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn mutations_land_in_the_command_log() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _step_rx) = ctx_in(&dir, vec![]);

    let response = handle_envelope(
        envelope(Request::Kill {
            ids: vec![TargetId::new("t1"), TargetId::new("t2")],
        }),
        &ctx,
    )
    .await;
    assert_eq!(response, Response::Ok);

    handle_envelope(
        envelope(Request::Activate {
            ids: vec![TargetId::new("t3")],
        }),
        &ctx,
    )
    .await;

    let entries = ctx.command_log.lock().drain().unwrap();
    let commands: Vec<EngineCommand> = entries.into_iter().map(|e| e.command).collect();
    assert_eq!(
        commands,
        vec![
            EngineCommand::Kill {
                id: TargetId::new("t1")
            },
            EngineCommand::Kill {
                id: TargetId::new("t2")
            },
            EngineCommand::Activate {
                id: TargetId::new("t3")
            },
        ]
    );
}

#[tokio::test]
async fn step_requests_are_answered_by_the_engine_task() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, mut step_rx) = ctx_in(&dir, vec![]);

    // Stand-in engine task: answers one step with a canned event.
    tokio::spawn(async move {
        if let Some(request) = step_rx.recv().await {
            let _ = request.reply.send(vec![WhatHappened::Succeeded {
                id: TargetId::new("t1"),
            }]);
        }
    });

    let response = handle_envelope(envelope(Request::Step), &ctx).await;
    match response {
        Response::Happened { events } => {
            assert_eq!(events.len(), 1);
        }
        other => panic!("expected events, got {:?}", other),
    }
}

#[tokio::test]
async fn artifact_queries_delegate_to_the_backend() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _step_rx) = ctx_in(&dir, vec![]);

    let submitted = handle_envelope(
        envelope(Request::Submit {
            targets: vec![long_running_spec("job", "fake", "work")],
        }),
        &ctx,
    )
    .await;
    let Response::Submitted { ids } = submitted else {
        panic!("expected Submitted");
    };

    let artifact = handle_envelope(
        envelope(Request::GetArtifact {
            id: ids[0].clone(),
            query_name: "stdout".into(),
        }),
        &ctx,
    )
    .await;
    assert_eq!(
        artifact,
        Response::Artifact {
            bytes: b"fake stdout".to_vec()
        }
    );

    let unknown = handle_envelope(
        envelope(Request::GetArtifact {
            id: ids[0].clone(),
            query_name: "flamegraph".into(),
        }),
        &ctx,
    )
    .await;
    match unknown {
        Response::Error { message } => {
            assert!(message.contains("flamegraph"));
            assert!(message.contains("stdout"), "lists available items: {message}");
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn status_reports_counts() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _step_rx) = ctx_in(&dir, vec![]);

    handle_envelope(
        envelope(Request::Submit {
            targets: vec![noop_spec("a"), noop_spec("b")],
        }),
        &ctx,
    )
    .await;

    let response = handle_envelope(envelope(Request::Status), &ctx).await;
    let Response::Status(report) = response else {
        panic!("expected status");
    };
    assert_eq!(report.targets_total, 2);
    assert_eq!(report.activable, 2);
    assert_eq!(report.invariant_violations, 0);
}

#[tokio::test]
async fn get_target_round_trips_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _step_rx) = ctx_in(&dir, vec![]);

    let Response::Submitted { ids } = handle_envelope(
        envelope(Request::Submit {
            targets: vec![noop_spec("solo")],
        }),
        &ctx,
    )
    .await
    else {
        panic!("expected Submitted");
    };

    let response = handle_envelope(
        envelope(Request::GetTarget {
            id: ids[0].clone(),
        }),
        &ctx,
    )
    .await;
    let Response::Target { target } = response else {
        panic!("expected target");
    };
    assert_eq!(target.name, "solo");

    let missing = handle_envelope(
        envelope(Request::GetTarget {
            id: TargetId::new("ghost"),
        }),
        &ctx,
    )
    .await;
    assert!(matches!(missing, Response::Error { .. }));
}
