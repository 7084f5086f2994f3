// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gantry_core::{StateKind, Target};
use gantry_engine::EngineConfig as EC;

fn config_in(dir: &tempfile::TempDir) -> Config {
    let root = dir.path().to_path_buf();
    Config {
        socket_path: root.join("gantryd.sock"),
        lock_path: root.join("gantryd.pid"),
        log_path: root.join("gantryd.log"),
        auth_tokens: vec![],
        engine: EC::default(),
        db_root: root,
    }
}

#[tokio::test]
async fn run_step_works_without_a_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    run_step(&config).await.unwrap();
    // The standalone engine left a recovered store behind.
    assert!(config.db_root.join("targets").is_dir());
}

#[tokio::test]
async fn run_step_drives_submitted_work() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    // Seed a target and an activation out-of-band, the way the daemon
    // would.
    {
        let store = Store::open(&config.db_root).unwrap();
        let clock = SystemClock;
        use gantry_core::Clock;
        let target = Target::create(
            TargetId::new("t1"),
            gantry_core::test_support::noop_spec("solo"),
            clock.epoch_ms(),
        );
        store.insert(&target).unwrap();
        let mut log = gantry_store::CommandLog::open(
            &store.command_log_path(),
            &store.command_offset_path(),
        )
        .unwrap();
        log.append(gantry_store::EngineCommand::Activate {
            id: TargetId::new("t1"),
        })
        .unwrap();
    }

    // A few ticks run it to done.
    for _ in 0..4 {
        run_step(&config).await.unwrap();
    }

    let store = Store::open(&config.db_root).unwrap();
    let target = store.require(&TargetId::new("t1")).unwrap();
    assert_eq!(target.state().kind(), StateKind::RanSuccessfully);
}

#[tokio::test]
async fn info_without_daemon_is_a_user_todo() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let err = info(&config).await.unwrap_err();
    assert_eq!(err.code(), 2);
}

#[tokio::test]
async fn unknown_call_term_is_not_implemented() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let err = call(&config, "frobnicate", &[]).await.unwrap_err();
    assert_eq!(err.code(), 3);
}

#[tokio::test]
async fn call_argument_errors_do_not_touch_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let err = call(&config, "get", &[]).await.unwrap_err();
    assert_eq!(err.code(), 4);

    let err = call(&config, "artifact", &["only-one".into()])
        .await
        .unwrap_err();
    assert_eq!(err.code(), 4);
}
