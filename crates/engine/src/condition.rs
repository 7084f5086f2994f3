// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Condition evaluation on a host.

use gantry_core::Condition;
use gantry_host::{shell_quote, Host, HostError};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Evaluation faults, split the way the engine consumes them.
#[derive(Debug, Error)]
pub enum ConditionError {
    /// Transient host fault; re-evaluate next tick.
    #[error("recoverable: {0}")]
    Recoverable(String),
    /// Permanent fault; the target fails its condition.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<HostError> for ConditionError {
    fn from(e: HostError) -> Self {
        if e.is_recoverable() {
            ConditionError::Recoverable(e.to_string())
        } else {
            ConditionError::Fatal(e.to_string())
        }
    }
}

/// Evaluate a condition on the target's host.
///
/// Boxed because the boolean connectives recurse.
pub fn evaluate<'a>(
    condition: &'a Condition,
    host: &'a Host,
) -> Pin<Box<dyn Future<Output = Result<bool, ConditionError>> + Send + 'a>> {
    Box::pin(async move {
        match condition {
            Condition::True => Ok(true),
            Condition::False => Ok(false),
            Condition::VolumeExists { path } => {
                let out = host
                    .run_command(&format!("test -e {}", shell_quote(path)))
                    .await?;
                Ok(out.exit == 0)
            }
            Condition::CommandReturns { command, exit } => {
                let out = host.run_command(command).await?;
                Ok(out.exit == *exit)
            }
            Condition::And { of } => {
                for sub in of {
                    if !evaluate(sub, host).await? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or { of } => {
                for sub in of {
                    if evaluate(sub, host).await? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not { of } => Ok(!evaluate(of, host).await?),
        }
    })
}

/// Stable fingerprint of a condition, used for `SameActiveCondition`
/// equivalence matching.
pub fn fingerprint(condition: &Condition) -> String {
    use sha2::{Digest, Sha256};
    let canonical = serde_json::to_string(condition).unwrap_or_default();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

#[cfg(test)]
#[path = "condition_tests.rs"]
mod tests;
