//! Kill semantics against real processes.

use crate::prelude::*;
use gantry_core::{StateKind, TargetId};
use gantry_store::EngineCommand;
use std::time::Duration;

#[tokio::test]
async fn kill_mid_build_cancels_within_a_tick() {
    let mut world = world();
    submit(&world, "victim", process_spec(&world, "victim", "sleep 60"));
    activate(&world, "victim");

    // Drive it into the running family.
    for _ in 0..100 {
        world.engine.step().await.unwrap();
        let kind = target(&world, "victim").state().kind();
        if kind == StateKind::StillBuilding || kind == StateKind::StartedRunning {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(target(&world, "victim").state().is_running());

    world
        .engine
        .enqueue(EngineCommand::Kill {
            id: TargetId::new("victim"),
        })
        .unwrap();
    world.engine.step().await.unwrap();

    assert_eq!(target(&world, "victim").state().kind(), StateKind::Killed);

    // Killing again changes nothing.
    world
        .engine
        .enqueue(EngineCommand::Kill {
            id: TargetId::new("victim"),
        })
        .unwrap();
    world.engine.step().await.unwrap();
    let after = target(&world, "victim");
    assert_eq!(after.state().kind(), StateKind::Killed);
    assert_eq!(
        after
            .history
            .iter()
            .filter(|e| e.state.kind() == StateKind::Killed)
            .count(),
        1
    );
}

#[tokio::test]
async fn kill_before_activation_is_killed_from_passive() {
    let mut world = world();
    submit(&world, "quiet", noop_spec("quiet"));
    world
        .engine
        .enqueue(EngineCommand::Kill {
            id: TargetId::new("quiet"),
        })
        .unwrap();
    world.engine.step().await.unwrap();
    assert_eq!(
        target(&world, "quiet").state().kind(),
        StateKind::KilledFromPassive
    );
}
