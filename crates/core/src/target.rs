// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target: the unit of work.
//!
//! Identity is immutable; all mutable state lives in the append-only
//! history. The latest history entry is the current state.

use crate::condition::Condition;
use crate::host::HostSpec;
use crate::id::TargetId;
use crate::state::{ActivatedBy, SimpleState, State, StateKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Backend-opaque serialized state describing an in-flight job.
///
/// The payload is owned by the backend named in the build process;
/// everything else treats it as bytes. Backends version their payloads
/// independently of the target envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub version: u32,
    pub payload: serde_json::Value,
}

impl RunParameters {
    pub fn new(version: u32, payload: serde_json::Value) -> Self {
        Self { version, payload }
    }
}

/// What the target does when it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildProcess {
    /// Nothing to run; the target succeeds once dependencies and
    /// condition allow it.
    NoOperation,
    /// Work dispatched to a named backend plugin.
    LongRunning {
        backend: String,
        run_parameters: RunParameters,
    },
}

/// DAG-level deduplication policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equivalence {
    #[default]
    None,
    /// Targets with an equal active condition share one build outcome.
    SameActiveCondition,
}

/// One step of a target's life: `(timestamp, state)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at_ms: u64,
    #[serde(flatten)]
    pub state: State,
}

/// Raised when a write would violate the state machine.
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("target {id} is terminal ({kind}); refusing transition to {requested}")]
    Terminal {
        id: TargetId,
        kind: StateKind,
        requested: StateKind,
    },
}

/// Submission-time description of a target (everything but id and history).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub depends_on: Vec<TargetId>,
    #[serde(default)]
    pub make_fail_if: Vec<TargetId>,
    #[serde(default)]
    pub success_triggers: Vec<TargetId>,
    #[serde(default)]
    pub fallbacks: Vec<TargetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub equivalence: Equivalence,
    pub build_process: BuildProcess,
    #[serde(default)]
    pub host: HostSpec,
}

/// The unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Edges of the DAG, ordered as submitted.
    #[serde(default)]
    pub depends_on: Vec<TargetId>,
    /// Targets whose failure makes this one fail.
    #[serde(default)]
    pub make_fail_if: Vec<TargetId>,
    /// Targets to activate when this one succeeds.
    #[serde(default)]
    pub success_triggers: Vec<TargetId>,
    /// Targets to activate when this one fails (make_fail_if trumps).
    #[serde(default)]
    pub fallbacks: Vec<TargetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub equivalence: Equivalence,
    pub build_process: BuildProcess,
    #[serde(default)]
    pub host: HostSpec,
    /// Append-only `(timestamp, state)` sequence; entry 0 is Passive.
    pub history: Vec<HistoryEntry>,
}

impl Target {
    /// Create a target in `Passive` from its spec.
    pub fn create(id: TargetId, spec: TargetSpec, epoch_ms: u64) -> Self {
        Self {
            id,
            name: spec.name,
            tags: spec.tags,
            metadata: spec.metadata,
            depends_on: spec.depends_on,
            make_fail_if: spec.make_fail_if,
            success_triggers: spec.success_triggers,
            fallbacks: spec.fallbacks,
            condition: spec.condition,
            equivalence: spec.equivalence,
            build_process: spec.build_process,
            host: spec.host,
            history: vec![HistoryEntry {
                at_ms: epoch_ms,
                state: State::Passive,
            }],
        }
    }

    /// Current state (latest history entry).
    pub fn state(&self) -> &State {
        // history is never empty: create() seeds Passive and push_state
        // only appends.
        match self.history.last() {
            Some(entry) => &entry.state,
            None => &State::Passive,
        }
    }

    pub fn simple_state(&self) -> SimpleState {
        self.state().simple()
    }

    /// Epoch millis of creation (first history entry).
    pub fn created_at_ms(&self) -> u64 {
        self.history.first().map(|e| e.at_ms).unwrap_or(0)
    }

    /// Append a new state, refusing to leave a terminal state.
    pub fn push_state(&mut self, state: State, epoch_ms: u64) -> Result<(), TransitionError> {
        let current = self.state();
        if current.is_terminal() {
            return Err(TransitionError::Terminal {
                id: self.id.clone(),
                kind: current.kind(),
                requested: state.kind(),
            });
        }
        self.history.push(HistoryEntry {
            at_ms: epoch_ms,
            state,
        });
        Ok(())
    }

    /// Replace the backend run parameters.
    ///
    /// Only legal while a job is in flight (invariant: run parameters
    /// are mutated via the backend's serialize step, Running family only).
    pub fn set_run_parameters(&mut self, rp: RunParameters) {
        debug_assert!(self.state().is_running());
        if let BuildProcess::LongRunning {
            ref mut run_parameters,
            ..
        } = self.build_process
        {
            *run_parameters = rp;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether a backend plugin is responsible for this target's work.
    pub fn has_backend_job(&self) -> bool {
        matches!(self.build_process, BuildProcess::LongRunning { .. })
    }

    /// A target can be killed any time before it terminates.
    pub fn is_killable(&self) -> bool {
        !self.is_finished()
    }

    /// Derived from history: did a user (not a trigger) activate this?
    pub fn activated_by_user(&self) -> bool {
        self.history.iter().any(|e| {
            matches!(
                e.state,
                State::Active {
                    by: ActivatedBy::User
                }
            )
        })
    }

    /// Latest start attempt counter, if any.
    pub fn latest_attempt(&self) -> u32 {
        self.history
            .iter()
            .rev()
            .find_map(|e| match e.state {
                State::TriedToStart { attempt } => Some(attempt),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Summary DTO for query responses.
    pub fn summary(&self) -> TargetSummary {
        TargetSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            tags: self.tags.iter().cloned().collect(),
            state: self.state().kind(),
            simple_state: self.simple_state(),
            created_at_ms: self.created_at_ms(),
            activated_by_user: self.activated_by_user(),
            killable: self.is_killable(),
        }
    }
}

/// Compact target view returned by queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub id: TargetId,
    pub name: String,
    pub tags: Vec<String>,
    pub state: StateKind,
    pub simple_state: SimpleState,
    pub created_at_ms: u64,
    pub activated_by_user: bool,
    pub killable: bool,
}

#[cfg(test)]
#[path = "target_tests.rs"]
mod tests;
