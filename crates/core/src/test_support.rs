// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::condition::Condition;
use crate::id::TargetId;
use crate::state::{ActivatedBy, State};
use crate::target::{BuildProcess, Equivalence, RunParameters, Target, TargetSpec};
use std::collections::BTreeSet;

/// A minimal no-op target spec.
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
        equivalence: Equivalence::None,
        build_process: BuildProcess::NoOperation,
        host: Default::default(),
    }
}

/// A spec dispatching `command` to the named backend.
pub fn long_running_spec(name: &str, backend: &str, command: &str) -> TargetSpec {
    TargetSpec {
        build_process: BuildProcess::LongRunning {
            backend: backend.to_string(),
            run_parameters: RunParameters::new(
                1,
                serde_json::json!({ "command": command }),
            ),
        },
        ..noop_spec(name)
    }
}

/// A no-op spec guarded by a condition.
pub fn conditional_spec(name: &str, condition: Condition) -> TargetSpec {
    TargetSpec {
        condition: Some(condition),
        ..noop_spec(name)
    }
}

/// Create a target already advanced through the given states.
pub fn target_with_states(id: &str, spec: TargetSpec, states: &[State]) -> Target {
    let mut target = Target::create(TargetId::new(id), spec, 1_000_000);
    let mut at_ms = 1_000_001;
    for state in states {
        #[allow(clippy::unwrap_used)]
        target.push_state(state.clone(), at_ms).unwrap();
        at_ms += 1;
    }
    target
}

/// An Active state with user activation.
pub fn active_by_user() -> State {
    State::Active {
        by: ActivatedBy::User,
    }
}
