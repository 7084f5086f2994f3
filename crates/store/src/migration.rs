// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target-envelope migration system for schema evolution.
//!
//! Migrations transform target payload JSON from one version to the
//! next; the registry chains them to reach the current version. An
//! envelope newer than the running binary is a fatal error, never a
//! silent downgrade.

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during migration
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration v{from}→v{to} failed: {reason}")]
    Failed { from: u32, to: u32, reason: String },
    #[error("no migration path from v{0} to v{1}")]
    NoPath(u32, u32),
    #[error("target version {0} is newer than supported ({1})")]
    TooNew(u32, u32),
}

/// A migration from one envelope version to the next.
pub trait Migration: Send + Sync {
    fn source_version(&self) -> u32;
    fn target_version(&self) -> u32;
    fn migrate(&self, payload: &mut Value) -> Result<(), MigrationError>;
}

/// Registry of migrations for upgrading stored targets.
pub struct MigrationRegistry {
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRegistry {
    /// Create a new registry with all known migrations.
    pub fn new() -> Self {
        Self {
            migrations: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with(migrations: Vec<Box<dyn Migration>>) -> Self {
        Self { migrations }
    }

    /// Upgrade a payload from `current` to `target`, returning the
    /// payload and whether anything changed.
    pub fn migrate_to(
        &self,
        mut payload: Value,
        current: u32,
        target: u32,
    ) -> Result<(Value, bool), MigrationError> {
        if current == target {
            return Ok((payload, false));
        }
        if current > target {
            return Err(MigrationError::TooNew(current, target));
        }

        let mut version = current;
        while version < target {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.source_version() == version)
                .ok_or(MigrationError::NoPath(version, target))?;

            migration.migrate(&mut payload)?;
            version = migration.target_version();
        }
        Ok((payload, true))
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;
