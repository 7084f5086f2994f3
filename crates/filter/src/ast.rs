// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filter AST and its canonical printer.
//!
//! The printer emits base forms only (aliases are a parse-time
//! convenience), so `parse(print(ast)) == ast`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    All,
    Status(StatusPred),
    CreatedInThePast(TimeSpan),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Name(StringPred),
    Id(StringPred),
    Tags(Vec<StringPred>),
}

/// Status predicates over a target's state and derived flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusPred {
    Activable,
    InProgress,
    Successful,
    Failed,
    ReallyRunning,
    Killable,
    DependencyDead,
    ActivatedByUser,
    KilledFromPassive,
    FailedFromRunning,
    FailedFromStarting,
    FailedFromCondition,
}

impl StatusPred {
    /// The base-form atom for this predicate.
    pub fn atom(&self) -> &'static str {
        match self {
            StatusPred::Activable => "is-activable",
            StatusPred::InProgress => "is-in-progress",
            StatusPred::Successful => "is-successful",
            StatusPred::Failed => "is-failed",
            StatusPred::ReallyRunning => "is-really-running",
            StatusPred::Killable => "is-killable",
            StatusPred::DependencyDead => "is-dependency-dead",
            StatusPred::ActivatedByUser => "is-activated-by-user",
            StatusPred::KilledFromPassive => "killed-from-passive",
            StatusPred::FailedFromRunning => "failed-from-running",
            StatusPred::FailedFromStarting => "failed-from-starting",
            StatusPred::FailedFromCondition => "failed-from-condition",
        }
    }
}

/// String predicate: exact match or POSIX regex search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringPred {
    Equals(String),
    Re(String),
}

/// Time units accepted by `created-in-the-past`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    pub fn atom(&self) -> &'static str {
        match self {
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
            TimeUnit::Weeks => "weeks",
        }
    }

    fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Hours => 3_600.0,
            TimeUnit::Days => 86_400.0,
            TimeUnit::Weeks => 7.0 * 86_400.0,
        }
    }
}

/// A span like `(weeks 4)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub unit: TimeUnit,
    pub amount: f64,
}

impl TimeSpan {
    pub fn seconds(&self) -> f64 {
        self.unit.seconds() * self.amount
    }

    pub fn millis(&self) -> u64 {
        (self.seconds() * 1_000.0).max(0.0) as u64
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', r"\\").replace('"', "\\\""))
}

impl fmt::Display for StringPred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringPred::Equals(s) => write!(f, "(equals {})", quote(s)),
            StringPred::Re(s) => write!(f, "(re {})", quote(s)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "(all)"),
            Filter::Status(pred) => write!(f, "({})", pred.atom()),
            Filter::CreatedInThePast(span) => {
                write!(f, "(created-in-the-past ({} {}))", span.unit.atom(), span.amount)
            }
            Filter::And(parts) => {
                write!(f, "(and")?;
                for part in parts {
                    write!(f, " {}", part)?;
                }
                write!(f, ")")
            }
            Filter::Or(parts) => {
                write!(f, "(or")?;
                for part in parts {
                    write!(f, " {}", part)?;
                }
                write!(f, ")")
            }
            Filter::Not(inner) => write!(f, "(not {})", inner),
            Filter::Name(pred) => write!(f, "(name {})", pred),
            Filter::Id(pred) => write!(f, "(id {})", pred),
            Filter::Tags(preds) => {
                write!(f, "(tags")?;
                for pred in preds {
                    write!(f, " {}", pred)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
#[path = "ast_tests.rs"]
mod tests;
