// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisory indices over the target store.
//!
//! Maintained by the engine and rebuilt from a full scan at startup;
//! correctness never depends on them alone.

use crate::store::{write_file_durable, StoreError};
use gantry_core::{SimpleState, State, Target, TargetId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::warn;

/// Membership sets plus the equivalence pointer map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Indices {
    pub active: BTreeSet<TargetId>,
    pub passive: BTreeSet<TargetId>,
    pub finished: BTreeSet<TargetId>,
    pub pointers: BTreeMap<TargetId, TargetId>,
}

impl Indices {
    /// Ids the engine should consider each tick.
    pub fn work_set(&self) -> BTreeSet<TargetId> {
        self.active.union(&self.passive).cloned().collect()
    }

    /// Record a target's current state, moving it between sets.
    pub fn note(&mut self, target: &Target) {
        let id = &target.id;
        self.active.remove(id);
        self.passive.remove(id);
        self.finished.remove(id);
        match target.simple_state() {
            SimpleState::Activable => {
                self.passive.insert(id.clone());
            }
            SimpleState::InProgress => {
                self.active.insert(id.clone());
            }
            SimpleState::Successful | SimpleState::Failed => {
                self.finished.insert(id.clone());
            }
        }
        if let State::Redirected { to } = target.state() {
            self.pointers.insert(id.clone(), to.clone());
        }
    }

    /// Load from disk; missing or corrupt files yield empty indices
    /// (they are advisory and will be rebuilt).
    pub fn load(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(indices) => indices,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt indices, rebuilding");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_file_durable(path, &serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
#[path = "indices_tests.rs"]
mod tests;
