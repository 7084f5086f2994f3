//! Shared fixture for engine specs: a real engine over a temp-dir
//! store, dispatching to the process backend on localhost.

use gantry_backends::{Backend, BackendRegistry, ProcessBackend};
use gantry_core::{
    BuildProcess, Clock, SystemClock, Target, TargetId, TargetSpec, UuidIdGen, WhatHappened,
};
use gantry_engine::{Engine, EngineConfig};
use gantry_store::{EngineCommand, Store};
use std::collections::BTreeSet;
use std::time::Duration;

pub struct World {
    pub engine: Engine<SystemClock, UuidIdGen>,
    pub dir: tempfile::TempDir,
}

pub fn world() -> World {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("db")).unwrap();
    let engine = Engine::new(
        store,
        BackendRegistry::builtin(),
        SystemClock,
        UuidIdGen,
        EngineConfig::default(),
    )
    .unwrap();
    World { engine, dir }
}

/// Reopen the same database with a fresh engine (simulated restart).
pub fn reopen(world: &World) -> Engine<SystemClock, UuidIdGen> {
    let store = Store::open(world.dir.path().join("db")).unwrap();
    Engine::new(
        store,
        BackendRegistry::builtin(),
        SystemClock,
        UuidIdGen,
        EngineConfig::default(),
    )
    .unwrap()
}

pub fn noop_spec(name: &str) -> TargetSpec {
    TargetSpec {
        name: name.to_string(),
        tags: BTreeSet::new(),
        metadata: None,
        depends_on: Vec::new(),
        make_fail_if: Vec::new(),
        success_triggers: Vec::new(),
        fallbacks: Vec::new(),
        condition: None,
        equivalence: Default::default(),
        build_process: BuildProcess::NoOperation,
        host: Default::default(),
    }
}

/// A process-backend spec, playgrounds rooted inside the world's dir.
pub fn process_spec(world: &World, name: &str, command: &str) -> TargetSpec {
    let backend = ProcessBackend::new();
    let run_parameters = backend
        .create(serde_json::json!({
            "command": command,
            "playground_root": world.dir.path().join("play").to_string_lossy(),
        }))
        .unwrap();
    std::fs::create_dir_all(world.dir.path().join("play")).unwrap();
    TargetSpec {
        build_process: BuildProcess::LongRunning {
            backend: "process".to_string(),
            run_parameters,
        },
        ..noop_spec(name)
    }
}

pub fn submit(world: &World, id: &str, spec: TargetSpec) {
    let target = Target::create(TargetId::new(id), spec, SystemClock.epoch_ms());
    world.engine.store().insert(&target).unwrap();
}

pub fn activate(world: &World, id: &str) {
    world
        .engine
        .enqueue(EngineCommand::Activate {
            id: TargetId::new(id),
        })
        .unwrap();
}

pub fn target(world: &World, id: &str) -> Target {
    world.engine.store().require(&TargetId::new(id)).unwrap()
}

/// Tick until the target terminates (real time; process jobs run for
/// real), collecting every event along the way.
pub async fn run_until_terminal(world: &mut World, id: &str) -> Vec<WhatHappened> {
    let mut events = Vec::new();
    for _ in 0..200 {
        events.extend(world.engine.step().await.unwrap());
        if target(world, id).is_finished() {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("target {id} never terminated; events: {events:?}");
}
