//! Server-side filter compilation over a live store.

use crate::prelude::*;
use gantry_core::{Clock, SystemClock, Target};
use gantry_filter::{compile_server_query, parse, CompiledFilter, TimeConstraint};

#[tokio::test]
async fn four_week_window_with_negated_status() {
    let filter =
        parse("(and (created-in-the-past (weeks 4)) (not (is-dependency-dead)))").unwrap();
    let now_ms = SystemClock.epoch_ms();
    let query = compile_server_query(&filter, now_ms);

    let four_weeks_ms = 4 * 7 * 86_400 * 1000;
    assert_eq!(
        query.time_constraint,
        Some(TimeConstraint::CreatedAfter(now_ms - four_weeks_ms))
    );
    similar_asserts::assert_eq!(
        query.predicate.to_string(),
        "(not (is-dependency-dead))"
    );
}

#[tokio::test]
async fn compiled_query_selects_from_the_store() {
    let mut world = world();
    submit(&world, "good", noop_spec("good"));
    submit(&world, "bad", process_spec(&world, "bad", "exit 1"));
    let mut orphan = noop_spec("orphan");
    orphan.depends_on = vec![gantry_core::TargetId::new("bad")];
    submit(&world, "orphan", orphan);

    activate(&world, "good");
    activate(&world, "orphan");
    run_until_terminal(&mut world, "good").await;
    run_until_terminal(&mut world, "orphan").await;

    let now_ms = SystemClock.epoch_ms();
    let filter =
        parse("(and (created-in-the-past (weeks 4)) (not (is-dependency-dead)))").unwrap();
    let query = compile_server_query(&filter, now_ms);
    let compiled = CompiledFilter::compile(&query.predicate).unwrap();

    let names: Vec<String> = world
        .engine
        .store()
        .scan()
        .unwrap()
        .iter()
        .map(Target::summary)
        .filter(|s| match query.time_constraint {
            Some(TimeConstraint::CreatedAfter(bound)) => s.created_at_ms >= bound,
            None => true,
        })
        .filter(|s| compiled.matches(s, now_ms))
        .map(|s| s.name)
        .collect();

    // The dependency-dead orphan is filtered out; everything else
    // (recently created) stays.
    assert!(names.contains(&"good".to_string()));
    assert!(names.contains(&"bad".to_string()));
    assert!(!names.contains(&"orphan".to_string()));
}
