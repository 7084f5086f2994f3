// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filter evaluation against target summaries.
//!
//! Compilation validates every regex up front so evaluation never
//! fails; a filter either compiles or is reported as a user error.

use crate::ast::{Filter, StatusPred, StringPred, TimeSpan};
use crate::parser::FilterError;
use gantry_core::{SimpleState, StateKind, TargetSummary};
use regex::Regex;

#[derive(Debug)]
enum CompiledPred {
    Equals(String),
    Re(Regex),
}

impl CompiledPred {
    fn compile(pred: &StringPred) -> Result<Self, FilterError> {
        match pred {
            StringPred::Equals(s) => Ok(CompiledPred::Equals(s.clone())),
            StringPred::Re(pattern) => {
                let regex = Regex::new(pattern).map_err(|e| FilterError::Regex {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                Ok(CompiledPred::Re(regex))
            }
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            CompiledPred::Equals(s) => value == s,
            CompiledPred::Re(regex) => regex.is_match(value),
        }
    }
}

#[derive(Debug)]
enum Node {
    All,
    Status(StatusPred),
    CreatedInThePast(TimeSpan),
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Name(CompiledPred),
    Id(CompiledPred),
    Tags(Vec<CompiledPred>),
}

/// A filter with regexes validated and compiled.
#[derive(Debug)]
pub struct CompiledFilter {
    root: Node,
}

impl CompiledFilter {
    pub fn compile(filter: &Filter) -> Result<Self, FilterError> {
        Ok(Self {
            root: compile_node(filter)?,
        })
    }

    /// Does `summary` match, with time predicates anchored at `now_ms`?
    pub fn matches(&self, summary: &TargetSummary, now_ms: u64) -> bool {
        eval(&self.root, summary, now_ms)
    }
}

fn compile_node(filter: &Filter) -> Result<Node, FilterError> {
    Ok(match filter {
        Filter::All => Node::All,
        Filter::Status(pred) => Node::Status(*pred),
        Filter::CreatedInThePast(span) => Node::CreatedInThePast(*span),
        Filter::And(parts) => Node::And(
            parts
                .iter()
                .map(compile_node)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Filter::Or(parts) => Node::Or(
            parts
                .iter()
                .map(compile_node)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Filter::Not(inner) => Node::Not(Box::new(compile_node(inner)?)),
        Filter::Name(pred) => Node::Name(CompiledPred::compile(pred)?),
        Filter::Id(pred) => Node::Id(CompiledPred::compile(pred)?),
        Filter::Tags(preds) => Node::Tags(
            preds
                .iter()
                .map(CompiledPred::compile)
                .collect::<Result<Vec<_>, _>>()?,
        ),
    })
}

fn eval(node: &Node, summary: &TargetSummary, now_ms: u64) -> bool {
    match node {
        Node::All => true,
        Node::Status(pred) => eval_status(*pred, summary),
        Node::CreatedInThePast(span) => {
            summary.created_at_ms >= now_ms.saturating_sub(span.millis())
        }
        Node::And(parts) => parts.iter().all(|p| eval(p, summary, now_ms)),
        Node::Or(parts) => parts.iter().any(|p| eval(p, summary, now_ms)),
        Node::Not(inner) => !eval(inner, summary, now_ms),
        Node::Name(pred) => pred.matches(&summary.name),
        Node::Id(pred) => pred.matches(summary.id.as_str()),
        // Every predicate must match at least one tag.
        Node::Tags(preds) => preds
            .iter()
            .all(|pred| summary.tags.iter().any(|tag| pred.matches(tag))),
    }
}

fn eval_status(pred: StatusPred, summary: &TargetSummary) -> bool {
    match pred {
        StatusPred::Activable => summary.simple_state == SimpleState::Activable,
        StatusPred::InProgress => summary.simple_state == SimpleState::InProgress,
        StatusPred::Successful => summary.simple_state == SimpleState::Successful,
        StatusPred::Failed => summary.simple_state == SimpleState::Failed,
        StatusPred::ReallyRunning => matches!(
            summary.state,
            StateKind::StartedRunning
                | StateKind::StillBuilding
                | StateKind::StillVerifyingSuccess
        ),
        StatusPred::Killable => summary.killable,
        StatusPred::DependencyDead => summary.state == StateKind::DeadBecauseOfDependencies,
        StatusPred::ActivatedByUser => summary.activated_by_user,
        StatusPred::KilledFromPassive => summary.state == StateKind::KilledFromPassive,
        StatusPred::FailedFromRunning => summary.state == StateKind::FailedFromRunning,
        StatusPred::FailedFromStarting => summary.state == StateKind::FailedFromStarting,
        StatusPred::FailedFromCondition => summary.state == StateKind::FailedFromCondition,
    }
}

#[cfg(test)]
#[path = "eval_tests.rs"]
mod tests;
