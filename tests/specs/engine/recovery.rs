//! Crash recovery: a restarted engine resumes in-flight targets.

use crate::prelude::*;
use gantry_core::StateKind;
use std::time::Duration;

#[tokio::test]
async fn restarted_engine_resumes_polling_running_targets() {
    let mut world = world();
    submit(&world, "job", process_spec(&world, "job", "sleep 0.3"));
    activate(&world, "job");

    // Drive into the running family, then abandon this engine (the
    // process keeps running on the host, as it would across a daemon
    // crash).
    for _ in 0..100 {
        world.engine.step().await.unwrap();
        if target(&world, "job").state().is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let before = target(&world, "job").history.clone();
    assert!(target(&world, "job").state().is_running());

    let mut revived = reopen(&world);
    for _ in 0..200 {
        revived.step().await.unwrap();
        let t = revived
            .store()
            .require(&gantry_core::TargetId::new("job"))
            .unwrap();
        if t.is_finished() {
            assert_eq!(t.state().kind(), StateKind::RanSuccessfully);
            assert!(t.history.starts_with(&before), "no state was lost");
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("recovered target never finished");
}

#[tokio::test]
async fn unprocessed_commands_survive_a_restart() {
    let world = world();
    submit(&world, "late", noop_spec("late"));
    activate(&world, "late");
    // No tick happens before the "crash".

    let mut revived = reopen(&world);
    revived.step().await.unwrap();
    let t = revived
        .store()
        .require(&gantry_core::TargetId::new("late"))
        .unwrap();
    assert!(
        !matches!(t.state().kind(), StateKind::Passive),
        "the durable activation must be applied after restart"
    );
}
