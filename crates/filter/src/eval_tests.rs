// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::parser::parse;
use gantry_core::test_support::{noop_spec, target_with_states};
use gantry_core::{State, TargetId, TargetSummary};

const NOW_MS: u64 = 10_000_000;

fn summary(id: &str, name: &str, tags: &[&str], states: &[State]) -> TargetSummary {
    let mut spec = noop_spec(name);
    for tag in tags {
        spec.tags.insert(tag.to_string());
    }
    target_with_states(id, spec, states).summary()
}

fn matches(input: &str, summary: &TargetSummary) -> bool {
    let filter = parse(input).unwrap();
    CompiledFilter::compile(&filter).unwrap().matches(summary, NOW_MS)
}

fn running_summary() -> TargetSummary {
    summary(
        "r1",
        "nightly-etl",
        &["etl", "nightly"],
        &[
            State::Active {
                by: gantry_core::ActivatedBy::User,
            },
            State::TriedToStart { attempt: 1 },
            State::StillBuilding,
        ],
    )
}

#[test]
fn all_matches_everything() {
    assert!(matches("(all)", &running_summary()));
}

#[test]
fn status_predicates() {
    let running = running_summary();
    assert!(matches("(is-in-progress)", &running));
    assert!(matches("(is-really-running)", &running));
    assert!(matches("(is-killable)", &running));
    assert!(matches("(is-activated-by-user)", &running));
    assert!(!matches("(is-failed)", &running));
    assert!(!matches("(is-activable)", &running));

    let dead = summary(
        "d1",
        "dead",
        &[],
        &[
            State::Active {
                by: gantry_core::ActivatedBy::User,
            },
            State::DeadBecauseOfDependencies {
                failed: vec![TargetId::new("p")],
            },
        ],
    );
    assert!(matches("(is-dependency-dead)", &dead));
    assert!(matches("(is-failed)", &dead));
    assert!(!matches("(is-killable)", &dead));
}

#[test]
fn failure_family_predicates_distinguish_causes() {
    let from_running = summary(
        "f1",
        "f",
        &[],
        &[State::FailedFromRunning {
            reason: "exit 2".into(),
        }],
    );
    assert!(matches("(failed-from-running)", &from_running));
    assert!(!matches("(failed-from-starting)", &from_running));
    assert!(!matches("(failed-from-condition)", &from_running));

    let from_passive = summary("k1", "k", &[], &[State::KilledFromPassive]);
    assert!(matches("(killed-from-passive)", &from_passive));
}

#[test]
fn name_and_id_predicates() {
    let s = running_summary();
    assert!(matches("(name nightly-etl)", &s));
    assert!(matches("(name (re \"^night\"))", &s));
    assert!(!matches("(name (re \"^daily\"))", &s));
    assert!(matches("(id r1)", &s));
    assert!(matches("(id (re \"^r\"))", &s));
}

#[test]
fn tags_require_every_predicate_to_hit() {
    let s = running_summary();
    assert!(matches("(tags etl)", &s));
    assert!(matches("(tags etl nightly)", &s));
    assert!(matches("(tags (re \"^night\"))", &s));
    assert!(!matches("(tags etl missing)", &s));
}

#[test]
fn boolean_combinators() {
    let s = running_summary();
    assert!(matches("(and (is-in-progress) (tags etl))", &s));
    assert!(matches("(or (is-failed) (is-in-progress))", &s));
    assert!(matches("(not (is-failed))", &s));
    assert!(!matches("(and (is-in-progress) (is-failed))", &s));
    // Empty conjunction is vacuously true, empty disjunction false.
    assert!(matches("(and)", &s));
    assert!(!matches("(or)", &s));
}

#[test]
fn created_in_the_past_compares_against_now() {
    // Fixture targets are created at epoch-ms 1_000_000, nine thousand
    // seconds before NOW_MS.
    let s = running_summary();
    assert!(matches("(created-in-the-past (hours 3))", &s));
    assert!(!matches("(created-in-the-past (hours 2))", &s));
    assert!(matches("(created-in-the-past (weeks 52))", &s));
}

#[test]
fn bad_regex_is_rejected_at_compile_time() {
    let filter = parse("(name (re \"[\"))").unwrap();
    let err = CompiledFilter::compile(&filter).unwrap_err();
    assert!(matches!(err, FilterError::Regex { .. }));
}
