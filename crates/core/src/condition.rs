// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conditions: predicates evaluated on a host.
//!
//! A condition decides both whether work needs doing at all (skip-check
//! before starting) and whether a finished job actually produced its
//! artifact (post-run verification).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A predicate over the state of a host's filesystem or commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    True,
    False,
    /// Holds when `path` exists on the host.
    VolumeExists { path: String },
    /// Holds when running `command` exits with `exit`.
    CommandReturns { command: String, exit: i32 },
    And { of: Vec<Condition> },
    Or { of: Vec<Condition> },
    Not { of: Box<Condition> },
}

impl Condition {
    /// True when the condition can be decided without touching a host.
    pub fn is_constant(&self) -> bool {
        match self {
            Condition::True | Condition::False => true,
            Condition::VolumeExists { .. } | Condition::CommandReturns { .. } => false,
            Condition::And { of } | Condition::Or { of } => of.iter().all(Self::is_constant),
            Condition::Not { of } => of.is_constant(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::True => write!(f, "true"),
            Condition::False => write!(f, "false"),
            Condition::VolumeExists { path } => write!(f, "volume-exists {}", path),
            Condition::CommandReturns { command, exit } => {
                write!(f, "command-returns({}) == {}", command, exit)
            }
            Condition::And { of } => {
                write!(f, "(")?;
                for (i, c) in of.iter().enumerate() {
                    if i > 0 {
                        write!(f, " and ")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Condition::Or { of } => {
                write!(f, "(")?;
                for (i, c) in of.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Condition::Not { of } => write!(f, "not {}", of),
        }
    }
}

#[cfg(test)]
#[path = "condition_tests.rs"]
mod tests;
