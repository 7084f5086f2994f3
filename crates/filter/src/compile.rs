// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side query compilation.
//!
//! A client filter splits into a time constraint (a cheap prefilter
//! over creation timestamps) and a residual predicate evaluated per
//! candidate. `created-in-the-past` folds into `CreatedAfter`;
//! conjunction takes the max bound, disjunction the min; negation is
//! pushed through and/or by De Morgan first, and a time bound left
//! under a free-form `not` contributes no constraint (the residual
//! predicate still applies it).

use crate::ast::Filter;
use serde::{Deserialize, Serialize};

/// Server-side prefilter on creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeConstraint {
    /// Keep targets created at or after this epoch-milliseconds bound.
    CreatedAfter(u64),
}

/// A compiled server query: prefilter plus residual predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerQuery {
    pub time_constraint: Option<TimeConstraint>,
    pub predicate: Filter,
}

/// Split `filter` into `(time_constraint, residual predicate)`,
/// anchoring spans at `now_ms`.
pub fn compile_server_query(filter: &Filter, now_ms: u64) -> ServerQuery {
    let normalized = push_not(filter, false);
    let time_constraint = fold(&normalized, now_ms).map(TimeConstraint::CreatedAfter);
    let predicate = strip_spine(filter);
    ServerQuery {
        time_constraint,
        predicate,
    }
}

/// Push negation through conjunctions and disjunctions (De Morgan),
/// eliminating double negation. Leaves other nodes as `Not(leaf)`.
fn push_not(filter: &Filter, negated: bool) -> Filter {
    match filter {
        Filter::Not(inner) => push_not(inner, !negated),
        Filter::And(parts) => {
            let pushed: Vec<Filter> = parts.iter().map(|p| push_not(p, negated)).collect();
            if negated {
                Filter::Or(pushed)
            } else {
                Filter::And(pushed)
            }
        }
        Filter::Or(parts) => {
            let pushed: Vec<Filter> = parts.iter().map(|p| push_not(p, negated)).collect();
            if negated {
                Filter::And(pushed)
            } else {
                Filter::Or(pushed)
            }
        }
        leaf => {
            if negated {
                Filter::Not(Box::new(leaf.clone()))
            } else {
                leaf.clone()
            }
        }
    }
}

/// Fold a normalized filter into a `CreatedAfter` bound, if any.
fn fold(filter: &Filter, now_ms: u64) -> Option<u64> {
    match filter {
        Filter::CreatedInThePast(span) => Some(now_ms.saturating_sub(span.millis())),
        Filter::And(parts) => {
            // The tightest (latest) bound wins in a conjunction;
            // unconstrained conjuncts do not widen it.
            parts.iter().filter_map(|p| fold(p, now_ms)).max()
        }
        Filter::Or(parts) => {
            // Every branch must be bounded, and the loosest wins.
            let bounds: Vec<u64> = parts
                .iter()
                .map(|p| fold(p, now_ms))
                .collect::<Option<Vec<_>>>()?;
            bounds.into_iter().min()
        }
        // A surviving free-form `not` (including a negated time bound)
        // contributes nothing; the source behaves the same.
        Filter::Not(_) => None,
        _ => None,
    }
}

/// Remove time bounds that the fold absorbed: only those on the
/// positive conjunctive spine. Everything else stays in the residual.
fn strip_spine(filter: &Filter) -> Filter {
    match filter {
        Filter::CreatedInThePast(_) => Filter::All,
        Filter::And(parts) => {
            let kept: Vec<Filter> = parts
                .iter()
                .map(strip_spine)
                .filter(|p| !matches!(p, Filter::All))
                .collect();
            match kept.len() {
                0 => Filter::All,
                1 => kept.into_iter().next().unwrap_or(Filter::All),
                _ => Filter::And(kept),
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
#[path = "compile_tests.rs"]
mod tests;
