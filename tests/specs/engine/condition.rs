//! Conditions: skipping satisfied work and verifying artifacts.

use crate::prelude::*;
use gantry_core::{Condition, StateKind};

#[tokio::test]
async fn pre_satisfied_volume_skips_the_backend_entirely() {
    let mut world = world();

    // The artifact exists before the target ever runs.
    let artifact = world.dir.path().join("artifact");
    std::fs::write(&artifact, b"cached").unwrap();

    let mut spec = process_spec(&world, "cached", "echo should-not-run");
    spec.condition = Some(Condition::VolumeExists {
        path: artifact.to_string_lossy().into_owned(),
    });
    submit(&world, "cached", spec);

    activate(&world, "cached");
    run_until_terminal(&mut world, "cached").await;

    let t = target(&world, "cached");
    assert_eq!(t.state().kind(), StateKind::AlreadyDone);
    // No submission attempt ever made it into the history.
    assert!(t
        .history
        .iter()
        .all(|e| e.state.kind() != StateKind::TriedToStart));
}

#[tokio::test]
async fn condition_verifies_the_artifact_after_the_run() {
    let mut world = world();

    let artifact = world.dir.path().join("out.txt");
    let mut spec = process_spec(
        &world,
        "producer",
        &format!("echo done > {}", artifact.display()),
    );
    spec.condition = Some(Condition::VolumeExists {
        path: artifact.to_string_lossy().into_owned(),
    });
    submit(&world, "producer", spec);

    activate(&world, "producer");
    run_until_terminal(&mut world, "producer").await;

    // The job ran (condition did not hold up front) and verification
    // then found the artifact.
    let t = target(&world, "producer");
    assert_eq!(t.state().kind(), StateKind::RanSuccessfully);
    assert!(t
        .history
        .iter()
        .any(|e| e.state.kind() == StateKind::StillVerifyingSuccess));
}

#[tokio::test]
async fn missing_artifact_after_the_run_fails_the_condition() {
    let mut world = world();

    let mut spec = process_spec(&world, "liar", "true");
    spec.condition = Some(Condition::VolumeExists {
        path: world
            .dir
            .path()
            .join("never-created")
            .to_string_lossy()
            .into_owned(),
    });
    submit(&world, "liar", spec);

    activate(&world, "liar");
    run_until_terminal(&mut world, "liar").await;
    assert_eq!(
        target(&world, "liar").state().kind(),
        StateKind::FailedFromCondition
    );
}
