//! Failure propagation through the DAG.

use crate::prelude::*;
use gantry_core::{State, StateKind, TargetId};

#[tokio::test]
async fn failing_parent_kills_dependent_child() {
    let mut world = world();

    submit(&world, "a", process_spec(&world, "a", "exit 2"));
    let mut b = noop_spec("b");
    b.depends_on = vec![TargetId::new("a")];
    submit(&world, "b", b);

    activate(&world, "a");
    activate(&world, "b");
    run_until_terminal(&mut world, "a").await;
    run_until_terminal(&mut world, "b").await;

    let a = target(&world, "a");
    assert_eq!(a.state().kind(), StateKind::FailedFromRunning);
    // The failed entry records the exit code.
    match a.state() {
        State::FailedFromRunning { reason } => {
            assert!(reason.contains("exited 2"), "{reason}");
        }
        other => panic!("unexpected state {:?}", other),
    }

    let b = target(&world, "b");
    assert_eq!(b.state().kind(), StateKind::DeadBecauseOfDependencies);
    match b.state() {
        State::DeadBecauseOfDependencies { failed } => {
            assert_eq!(failed, &vec![TargetId::new("a")]);
        }
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn histories_only_ever_append() {
    let mut world = world();
    submit(&world, "a", process_spec(&world, "a", "sleep 0.2"));
    activate(&world, "a");

    let mut previous = Vec::new();
    for _ in 0..100 {
        world.engine.step().await.unwrap();
        let t = target(&world, "a");
        assert!(t.history.starts_with(&previous), "history must be a prefix");
        previous = t.history.clone();
        if t.is_finished() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert_eq!(target(&world, "a").state().kind(), StateKind::RanSuccessfully);
}
