// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gantry_core::test_support::{active_by_user, noop_spec, target_with_states};
use gantry_core::{State, Target};

fn make_target(id: &str) -> Target {
    Target::create(TargetId::new(id), noop_spec("build"), 1_000)
}

#[test]
fn insert_then_get_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();

    let target = make_target("t1");
    store.insert(&target).unwrap();

    let loaded = store.require(&TargetId::new("t1")).unwrap();
    assert_eq!(loaded.id, target.id);
    assert_eq!(loaded.history, target.history);
}

#[test]
fn get_missing_returns_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    assert!(store.get(&TargetId::new("ghost")).unwrap().is_none());
    assert!(matches!(
        store.require(&TargetId::new("ghost")),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn compare_and_set_detects_lost_update() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();

    let mut target = make_target("t1");
    store.insert(&target).unwrap();

    // Reader A and reader B both see history length 1.
    let mut other = store.require(&target.id).unwrap();

    target.push_state(active_by_user(), 1_001).unwrap();
    store.compare_and_set(&target, 1).unwrap();

    // B's write must now fail: the history moved under it.
    other.push_state(State::KilledFromPassive, 1_002).unwrap();
    let err = store.compare_and_set(&other, 1).unwrap_err();
    match err {
        StoreError::CasMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("expected cas mismatch, got {:?}", other),
    }
}

#[test]
fn write_batch_applies_all_or_checks_all() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();

    let mut parent = make_target("parent");
    let mut child = make_target("child");
    store.insert(&parent).unwrap();
    store.insert(&child).unwrap();

    parent.push_state(State::RanSuccessfully, 2_000).unwrap();
    child.push_state(active_by_user(), 2_000).unwrap();
    store.write_batch(&[parent.clone(), child.clone()], &[1, 1]).unwrap();

    assert_eq!(store.require(&parent.id).unwrap().history.len(), 2);
    assert_eq!(store.require(&child.id).unwrap().history.len(), 2);

    // Stale expectation on any member fails the whole batch up front.
    let err = store.write_batch(&[parent, child], &[1, 2]).unwrap_err();
    assert!(matches!(err, StoreError::CasMismatch { .. }));
}

#[test]
fn batch_arity_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let err = store.write_batch(&[make_target("a")], &[]).unwrap_err();
    assert!(matches!(err, StoreError::BatchArity { .. }));
}

#[test]
fn pending_journal_is_replayed_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let target = make_target("t1");

    {
        let store = Store::open(dir.path()).unwrap();
        store.insert(&target).unwrap();
    }

    // Simulate a crash after the journal fsync but before the apply:
    // write a journal recording a newer version of the target.
    let mut advanced = target.clone();
    advanced.push_state(active_by_user(), 2_000).unwrap();
    let journal = serde_json::json!({
        "targets": [{
            "version": TARGET_VERSION,
            "payload": serde_json::to_value(&advanced).unwrap(),
        }],
    });
    std::fs::write(
        dir.path().join("journal.json"),
        serde_json::to_vec(&journal).unwrap(),
    )
    .unwrap();

    let store = Store::open(dir.path()).unwrap();
    let loaded = store.require(&target.id).unwrap();
    assert_eq!(loaded.history.len(), 2, "journal must be redone");
    assert!(!dir.path().join("journal.json").exists());
}

#[test]
fn torn_journal_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("targets")).unwrap();
    std::fs::write(dir.path().join("journal.json"), b"{\"targets\": [tru").unwrap();

    let store = Store::open(dir.path()).unwrap();
    assert!(!dir.path().join("journal.json").exists());
    assert!(store.scan().unwrap().is_empty());
}

#[test]
fn scan_skips_corrupt_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    store.insert(&make_target("good")).unwrap();
    std::fs::write(dir.path().join("targets/bad.json"), b"not json").unwrap();

    let targets = store.scan().unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].id, "good");
}

#[test]
fn future_envelope_version_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let envelope = serde_json::json!({ "version": TARGET_VERSION + 1, "payload": {} });
    std::fs::write(
        dir.path().join("targets/new.json"),
        serde_json::to_vec(&envelope).unwrap(),
    )
    .unwrap();

    let err = store.get(&TargetId::new("new")).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Migration(MigrationError::TooNew(..))
    ));
    // And the full scan refuses to start against a newer schema.
    assert!(store.scan().is_err());
}

#[test]
fn recovery_scan_rebuilds_indices_and_running_set() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();

    store.insert(&make_target("passive")).unwrap();
    store
        .insert(&target_with_states(
            "running",
            noop_spec("r"),
            &[active_by_user(), State::TriedToStart { attempt: 1 }, State::StillBuilding],
        ))
        .unwrap();
    store
        .insert(&target_with_states(
            "done",
            noop_spec("d"),
            &[State::AlreadyDone],
        ))
        .unwrap();

    let recovered = store.recovery_scan().unwrap();
    assert!(recovered.indices.passive.contains(&TargetId::new("passive")));
    assert!(recovered.indices.active.contains(&TargetId::new("running")));
    assert!(recovered.indices.finished.contains(&TargetId::new("done")));
    assert_eq!(recovered.running, vec![TargetId::new("running")]);

    // Rebuilt indices were persisted.
    let loaded = store.load_indices();
    assert_eq!(loaded, recovered.indices);
}
