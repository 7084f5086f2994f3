// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashSet;

#[test]
fn uuid_idgen_generates_unique_ids() {
    let gen = UuidIdGen;
    let ids: HashSet<String> = (0..100).map(|_| gen.next()).collect();
    assert_eq!(ids.len(), 100);
}

#[test]
fn sequential_idgen_counts_up() {
    let gen = SequentialIdGen::new("t");
    assert_eq!(gen.next(), "t-1");
    assert_eq!(gen.next(), "t-2");
    assert_eq!(gen.next(), "t-3");
}

#[test]
fn sequential_idgen_clones_share_counter() {
    let gen = SequentialIdGen::new("t");
    let clone = gen.clone();
    assert_eq!(gen.next(), "t-1");
    assert_eq!(clone.next(), "t-2");
}

#[test]
fn target_id_display_and_eq() {
    let id = TargetId::new("abc-123");
    assert_eq!(id.to_string(), "abc-123");
    assert_eq!(id, "abc-123");
    assert_eq!(id.as_str(), "abc-123");
}

#[yare::parameterized(
    shorter_than_limit = { "abc", 8, "abc" },
    exactly_limit      = { "12345678", 8, "12345678" },
    longer_than_limit  = { "123456789", 8, "12345678" },
)]
fn short_truncates(input: &str, n: usize, expected: &str) {
    assert_eq!(TargetId::new(input).short(n), expected);
    assert_eq!(input.short(n), expected);
}

#[test]
fn target_id_round_trips_through_json() {
    let id = TargetId::new("round-trip");
    let json = serde_json::to_string(&id).unwrap();
    let back: TargetId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, back);
}
