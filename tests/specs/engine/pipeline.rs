//! A two-target pipeline: a no-op parent and an echo child.

use crate::prelude::*;
use gantry_backends::{Backend, ProcessBackend};
use gantry_core::{BuildProcess, StateKind, TargetId};
use gantry_host::Host;

#[tokio::test]
async fn noop_parent_then_echo_child_both_succeed() {
    let mut world = world();

    submit(&world, "a", noop_spec("a"));
    let mut b = process_spec(&world, "b", "echo ok");
    b.depends_on = vec![TargetId::new("a")];
    submit(&world, "b", b);

    // Activating only the child pulls the parent along.
    activate(&world, "b");
    run_until_terminal(&mut world, "b").await;

    let a = target(&world, "a");
    let b = target(&world, "b");
    assert_eq!(a.state().kind(), StateKind::RanSuccessfully);
    assert_eq!(b.state().kind(), StateKind::RanSuccessfully);

    // The child's run really produced "ok" on stdout.
    let BuildProcess::LongRunning {
        ref run_parameters, ..
    } = b.build_process
    else {
        panic!("child must have a backend job");
    };
    let host = Host::from_spec(b.host.clone());
    let stdout = ProcessBackend::new()
        .query(run_parameters, &host, "stdout")
        .await
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&stdout), "ok\n");

    // Ordering: the parent's terminal entry predates the child's first
    // submission attempt.
    let parent_done = a.history.last().unwrap().at_ms;
    let child_start = b
        .history
        .iter()
        .find(|e| e.state.kind() == StateKind::TriedToStart)
        .unwrap()
        .at_ms;
    assert!(parent_done <= child_start);
}

#[tokio::test]
async fn success_triggers_activate_children_with_the_parent_write() {
    let mut world = world();

    let mut first = process_spec(&world, "first", "true");
    first.success_triggers = vec![TargetId::new("second")];
    submit(&world, "first", first);
    submit(&world, "second", process_spec(&world, "second", "true"));

    activate(&world, "first");
    run_until_terminal(&mut world, "first").await;

    // The trigger fired without any user activation of the child.
    run_until_terminal(&mut world, "second").await;
    let second = target(&world, "second");
    assert_eq!(second.state().kind(), StateKind::RanSuccessfully);
    assert!(!second.activated_by_user());
}
