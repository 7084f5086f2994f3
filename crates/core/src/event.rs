// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine events: what happened during a tick.
//!
//! `Engine::step` returns these so the CLI and tests can observe
//! progress without reading the store.

use crate::id::TargetId;
use crate::state::ActivatedBy;
use serde::{Deserialize, Serialize};

/// One observable outcome of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "what", rename_all = "snake_case")]
pub enum WhatHappened {
    Activated { id: TargetId, by: ActivatedBy },
    /// Condition already held; target succeeded without a backend start.
    ConditionSatisfied { id: TargetId },
    /// Transitioned into TriedToStart; the submission fires next tick.
    StartScheduled { id: TargetId },
    Started { id: TargetId },
    StartRetried { id: TargetId, attempt: u32 },
    StartFailed { id: TargetId, reason: String },
    StillRunning { id: TargetId },
    /// Backend reported completion; verification scheduled.
    RunFinished { id: TargetId },
    Succeeded { id: TargetId },
    FailedRunning { id: TargetId, reason: String },
    FailedCondition { id: TargetId },
    DependenciesDied { id: TargetId, failed: Vec<TargetId> },
    MadeToFail { id: TargetId, cause: TargetId },
    Redirected { id: TargetId, to: TargetId },
    AdoptedOutcome { id: TargetId, from: TargetId },
    Killed { id: TargetId },
    KilledFromPassive { id: TargetId },
    TriggersFired { id: TargetId, children: Vec<TargetId> },
    FallbacksFired { id: TargetId, children: Vec<TargetId> },
    /// Invariant violation: logged and skipped, tick continues.
    Skipped { id: TargetId, reason: String },
}

impl WhatHappened {
    pub fn target_id(&self) -> &TargetId {
        match self {
            WhatHappened::Activated { id, .. }
            | WhatHappened::ConditionSatisfied { id }
            | WhatHappened::StartScheduled { id }
            | WhatHappened::Started { id }
            | WhatHappened::StartRetried { id, .. }
            | WhatHappened::StartFailed { id, .. }
            | WhatHappened::StillRunning { id }
            | WhatHappened::RunFinished { id }
            | WhatHappened::Succeeded { id }
            | WhatHappened::FailedRunning { id, .. }
            | WhatHappened::FailedCondition { id }
            | WhatHappened::DependenciesDied { id, .. }
            | WhatHappened::MadeToFail { id, .. }
            | WhatHappened::Redirected { id, .. }
            | WhatHappened::AdoptedOutcome { id, .. }
            | WhatHappened::Killed { id }
            | WhatHappened::KilledFromPassive { id }
            | WhatHappened::TriggersFired { id, .. }
            | WhatHappened::FallbacksFired { id, .. }
            | WhatHappened::Skipped { id, .. } => id,
        }
    }

    /// Whether this event represents forward progress (used by the
    /// service loop to decide between immediate re-tick and idle delay).
    pub fn is_advancement(&self) -> bool {
        !matches!(
            self,
            WhatHappened::StillRunning { .. } | WhatHappened::Skipped { .. }
        )
    }

    /// One-line description for logs.
    pub fn log_summary(&self) -> String {
        match self {
            WhatHappened::Activated { id, .. } => format!("{} activated", id.short(8)),
            WhatHappened::ConditionSatisfied { id } => {
                format!("{} condition already satisfied", id.short(8))
            }
            WhatHappened::StartScheduled { id } => {
                format!("{} scheduled to start", id.short(8))
            }
            WhatHappened::Started { id } => format!("{} started", id.short(8)),
            WhatHappened::StartRetried { id, attempt } => {
                format!("{} start retried (attempt {})", id.short(8), attempt)
            }
            WhatHappened::StartFailed { id, reason } => {
                format!("{} start failed: {}", id.short(8), reason)
            }
            WhatHappened::StillRunning { id } => format!("{} still running", id.short(8)),
            WhatHappened::RunFinished { id } => format!("{} run finished", id.short(8)),
            WhatHappened::Succeeded { id } => format!("{} succeeded", id.short(8)),
            WhatHappened::FailedRunning { id, reason } => {
                format!("{} failed: {}", id.short(8), reason)
            }
            WhatHappened::FailedCondition { id } => {
                format!("{} failed its success condition", id.short(8))
            }
            WhatHappened::DependenciesDied { id, .. } => {
                format!("{} dead because of dependencies", id.short(8))
            }
            WhatHappened::MadeToFail { id, cause } => {
                format!("{} make-fail-if triggered by {}", id.short(8), cause.short(8))
            }
            WhatHappened::Redirected { id, to } => {
                format!("{} redirected to {}", id.short(8), to.short(8))
            }
            WhatHappened::AdoptedOutcome { id, from } => {
                format!("{} adopted outcome of {}", id.short(8), from.short(8))
            }
            WhatHappened::Killed { id } => format!("{} killed", id.short(8)),
            WhatHappened::KilledFromPassive { id } => {
                format!("{} killed from passive", id.short(8))
            }
            WhatHappened::TriggersFired { id, children } => {
                format!("{} fired {} trigger(s)", id.short(8), children.len())
            }
            WhatHappened::FallbacksFired { id, children } => {
                format!("{} fired {} fallback(s)", id.short(8), children.len())
            }
            WhatHappened::Skipped { id, reason } => {
                format!("{} skipped: {}", id.short(8), reason)
            }
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
