// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target state machine.
//!
//! States are a single tagged variant; every transition site branches
//! exhaustively so the machine stays auditable. The engine is the only
//! writer of states; everything here is pure data and projections.

use crate::id::TargetId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a target left `Passive`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivatedBy {
    /// Explicit activation through the API or CLI.
    User,
    /// Fired by a parent's success trigger or fallback list.
    Parent { id: TargetId },
}

/// Detailed state of a target. Initial state is `Passive`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum State {
    /// Created but not yet asked to run.
    Passive,
    /// Eligible for scheduling once dependencies settle.
    Active { by: ActivatedBy },
    /// A backend `start` has been (or is about to be) issued.
    TriedToStart {
        /// Monotone attempt counter; > 1 means recoverable retries.
        attempt: u32,
    },
    /// Backend accepted the submission.
    StartedRunning,
    /// Last poll reported the job still running.
    StillBuilding,
    /// Job finished; the success condition is being verified.
    StillVerifyingSuccess,
    /// Condition already held at activation; no backend was started.
    AlreadyDone,
    /// Job ran and its condition verified.
    RanSuccessfully,
    /// Fatal submission failure.
    FailedFromStarting { reason: String },
    /// The backend reported the job failed.
    FailedFromRunning { reason: String },
    /// Job completed but the success condition does not hold.
    FailedFromCondition,
    /// One or more dependencies terminated unsuccessfully.
    DeadBecauseOfDependencies { failed: Vec<TargetId> },
    /// Redirected to an equivalent target; adopts its outcome.
    Redirected { to: TargetId },
    /// Killed after activation.
    Killed,
    /// Killed before ever becoming active.
    KilledFromPassive,
}

/// Simple four-way projection used by filters and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleState {
    Activable,
    InProgress,
    Successful,
    Failed,
}

/// Tag-only variant of [`State`] for protocol DTOs (strips associated data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Passive,
    Active,
    TriedToStart,
    StartedRunning,
    StillBuilding,
    StillVerifyingSuccess,
    AlreadyDone,
    RanSuccessfully,
    FailedFromStarting,
    FailedFromRunning,
    FailedFromCondition,
    DeadBecauseOfDependencies,
    Redirected,
    Killed,
    KilledFromPassive,
}

impl State {
    pub fn kind(&self) -> StateKind {
        match self {
            State::Passive => StateKind::Passive,
            State::Active { .. } => StateKind::Active,
            State::TriedToStart { .. } => StateKind::TriedToStart,
            State::StartedRunning => StateKind::StartedRunning,
            State::StillBuilding => StateKind::StillBuilding,
            State::StillVerifyingSuccess => StateKind::StillVerifyingSuccess,
            State::AlreadyDone => StateKind::AlreadyDone,
            State::RanSuccessfully => StateKind::RanSuccessfully,
            State::FailedFromStarting { .. } => StateKind::FailedFromStarting,
            State::FailedFromRunning { .. } => StateKind::FailedFromRunning,
            State::FailedFromCondition => StateKind::FailedFromCondition,
            State::DeadBecauseOfDependencies { .. } => StateKind::DeadBecauseOfDependencies,
            State::Redirected { .. } => StateKind::Redirected,
            State::Killed => StateKind::Killed,
            State::KilledFromPassive => StateKind::KilledFromPassive,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::AlreadyDone
                | State::RanSuccessfully
                | State::FailedFromStarting { .. }
                | State::FailedFromRunning { .. }
                | State::FailedFromCondition
                | State::DeadBecauseOfDependencies { .. }
                | State::Killed
                | State::KilledFromPassive
        )
    }

    /// Successful terminal states.
    pub fn is_successful(&self) -> bool {
        matches!(self, State::AlreadyDone | State::RanSuccessfully)
    }

    /// Failed or killed terminal states.
    pub fn is_failed(&self) -> bool {
        self.is_terminal() && !self.is_successful()
    }

    /// States where a backend job may be in flight.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            State::TriedToStart { .. }
                | State::StartedRunning
                | State::StillBuilding
                | State::StillVerifyingSuccess
        )
    }

    pub fn simple(&self) -> SimpleState {
        match self {
            State::Passive => SimpleState::Activable,
            State::Active { .. }
            | State::TriedToStart { .. }
            | State::StartedRunning
            | State::StillBuilding
            | State::StillVerifyingSuccess
            | State::Redirected { .. } => SimpleState::InProgress,
            State::AlreadyDone | State::RanSuccessfully => SimpleState::Successful,
            State::FailedFromStarting { .. }
            | State::FailedFromRunning { .. }
            | State::FailedFromCondition
            | State::DeadBecauseOfDependencies { .. }
            | State::Killed
            | State::KilledFromPassive => SimpleState::Failed,
        }
    }
}

impl StateKind {
    /// Short lowercase name, used in summaries and filter output.
    pub fn name(&self) -> &'static str {
        match self {
            StateKind::Passive => "passive",
            StateKind::Active => "active",
            StateKind::TriedToStart => "tried-to-start",
            StateKind::StartedRunning => "started-running",
            StateKind::StillBuilding => "still-building",
            StateKind::StillVerifyingSuccess => "still-verifying-success",
            StateKind::AlreadyDone => "already-done",
            StateKind::RanSuccessfully => "ran-successfully",
            StateKind::FailedFromStarting => "failed-from-starting",
            StateKind::FailedFromRunning => "failed-from-running",
            StateKind::FailedFromCondition => "failed-from-condition",
            StateKind::DeadBecauseOfDependencies => "dead-because-of-dependencies",
            StateKind::Redirected => "redirected",
            StateKind::Killed => "killed",
            StateKind::KilledFromPassive => "killed-from-passive",
        }
    }
}

impl fmt::Display for SimpleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimpleState::Activable => write!(f, "activable"),
            SimpleState::InProgress => write!(f, "in-progress"),
            SimpleState::Successful => write!(f, "successful"),
            SimpleState::Failed => write!(f, "failed"),
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
