// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable target store.
//!
//! Layout under the db root:
//! - `targets/<id>.json`: one envelope `{version, payload}` per target
//! - `indices/indices.json`: advisory indices (see [`crate::Indices`])
//! - `journal.json`: redo journal for multi-target batch writes
//! - `commands.log`, `commands.offset`: the engine command pipe
//!
//! Every write is tmp-file + fsync + rename + directory fsync, so an
//! acknowledged write survives a crash and a torn write never replaces
//! a good file.

use crate::indices::Indices;
use crate::migration::{MigrationError, MigrationRegistry};
use gantry_core::{Target, TargetId};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Current version of the target envelope.
pub const TARGET_VERSION: u32 = 1;

/// Errors from store operations.
///
/// Everything here is fatal for the engine loop except `CasMismatch`,
/// which signals a lost-update race to be retried next tick.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("target not found: {0}")]
    NotFound(TargetId),
    #[error("cas mismatch for {id}: expected history length {expected}, found {actual}")]
    CasMismatch {
        id: TargetId,
        expected: usize,
        actual: usize,
    },
    #[error("batch arity mismatch: {targets} targets, {expectations} expectations")]
    BatchArity { targets: usize, expectations: usize },
}

/// Versioned on-disk wrapper; `payload` is the serialized target.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    payload: serde_json::Value,
}

/// Journal of a pending batch write (redo on reopen).
#[derive(Debug, Serialize, Deserialize)]
struct BatchJournal {
    targets: Vec<Envelope>,
}

/// Result of the startup recovery scan.
#[derive(Debug, Default)]
pub struct RecoveredState {
    /// Indices rebuilt from the full scan.
    pub indices: Indices,
    /// Targets in a Running-family state, to re-ingest into the loop.
    pub running: Vec<TargetId>,
}

/// Durable KV store for targets.
pub struct Store {
    root: PathBuf,
    migrations: MigrationRegistry,
}

impl Store {
    /// Open (or create) a store, replaying any pending batch journal.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_migrations(root, MigrationRegistry::default())
    }

    pub fn open_with_migrations(
        root: impl Into<PathBuf>,
        migrations: MigrationRegistry,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("targets"))?;
        fs::create_dir_all(root.join("indices"))?;

        let store = Self { root, migrations };
        store.replay_journal()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_path(&self, id: &TargetId) -> PathBuf {
        self.root.join("targets").join(format!("{}.json", id))
    }

    fn journal_path(&self) -> PathBuf {
        self.root.join("journal.json")
    }

    pub fn indices_path(&self) -> PathBuf {
        self.root.join("indices").join("indices.json")
    }

    pub fn command_log_path(&self) -> PathBuf {
        self.root.join("commands.log")
    }

    pub fn command_offset_path(&self) -> PathBuf {
        self.root.join("commands.offset")
    }

    /// Fetch a target, upgrading its envelope in place if an old
    /// version is found. Unknown future versions are fatal.
    pub fn get(&self, id: &TargetId) -> Result<Option<Target>, StoreError> {
        let path = self.target_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        let (payload, migrated) =
            self.migrations
                .migrate_to(envelope.payload, envelope.version, TARGET_VERSION)?;
        let target: Target = serde_json::from_value(payload)?;
        if migrated {
            info!(id = %id, from = envelope.version, to = TARGET_VERSION, "upgraded target envelope");
            self.write_target(&target)?;
        }
        Ok(Some(target))
    }

    /// Fetch a target or fail.
    pub fn require(&self, id: &TargetId) -> Result<Target, StoreError> {
        self.get(id)?.ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Write a freshly created target (no CAS; submission assigns a
    /// new unique id).
    pub fn insert(&self, target: &Target) -> Result<(), StoreError> {
        self.write_target(target)
    }

    /// Write an updated target, ensuring nobody else advanced it since
    /// the caller read it (`expected` = history length at read time).
    pub fn compare_and_set(&self, target: &Target, expected: usize) -> Result<(), StoreError> {
        self.check_cas(target, expected)?;
        self.write_target(target)
    }

    fn check_cas(&self, target: &Target, expected: usize) -> Result<(), StoreError> {
        let current = self.require(&target.id)?;
        let actual = current.history.len();
        if actual != expected {
            return Err(StoreError::CasMismatch {
                id: target.id.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Atomic multi-target write with per-target CAS.
    ///
    /// All expectations are checked first, then the whole batch is
    /// journaled with one fsync before any target file is touched; a
    /// crash mid-apply redoes the batch on the next open.
    pub fn write_batch(
        &self,
        targets: &[Target],
        expected: &[usize],
    ) -> Result<(), StoreError> {
        if targets.len() != expected.len() {
            return Err(StoreError::BatchArity {
                targets: targets.len(),
                expectations: expected.len(),
            });
        }
        for (target, &expected) in targets.iter().zip(expected) {
            self.check_cas(target, expected)?;
        }

        let journal = BatchJournal {
            targets: targets
                .iter()
                .map(|t| {
                    Ok(Envelope {
                        version: TARGET_VERSION,
                        payload: serde_json::to_value(t)?,
                    })
                })
                .collect::<Result<Vec<_>, serde_json::Error>>()?,
        };
        write_file_durable(&self.journal_path(), &serde_json::to_vec(&journal)?)?;

        for target in targets {
            self.write_target(target)?;
        }

        fs::remove_file(self.journal_path())?;
        Ok(())
    }

    fn replay_journal(&self) -> Result<(), StoreError> {
        let path = self.journal_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let journal: BatchJournal = match serde_json::from_slice(&bytes) {
            Ok(journal) => journal,
            Err(e) => {
                // A torn journal means the batch never reached its
                // single fsync; the pre-batch state is consistent.
                warn!(error = %e, "discarding torn batch journal");
                fs::remove_file(&path)?;
                return Ok(());
            }
        };
        info!(targets = journal.targets.len(), "replaying batch journal");
        for envelope in &journal.targets {
            let target: Target = serde_json::from_value(envelope.payload.clone())?;
            self.write_target(&target)?;
        }
        fs::remove_file(&path)?;
        Ok(())
    }

    fn write_target(&self, target: &Target) -> Result<(), StoreError> {
        let envelope = Envelope {
            version: TARGET_VERSION,
            payload: serde_json::to_value(target)?,
        };
        write_file_durable(&self.target_path(&target.id), &serde_json::to_vec(&envelope)?)
    }

    /// Load every target in the store. Corrupt files are skipped with a
    /// warning rather than poisoning the scan.
    pub fn scan(&self) -> Result<Vec<Target>, StoreError> {
        let mut targets = Vec::new();
        for entry in fs::read_dir(self.root.join("targets"))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.get(&TargetId::new(stem)) {
                Ok(Some(target)) => targets.push(target),
                Ok(None) => {}
                Err(StoreError::Migration(e @ MigrationError::TooNew(..))) => {
                    // Refusing to run against a newer schema is the one
                    // scan error that must stop startup.
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable target");
                }
            }
        }
        targets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(targets)
    }

    /// Full-scan recovery: rebuild indices and collect Running-family
    /// targets for re-ingestion, persisting the rebuilt indices.
    pub fn recovery_scan(&self) -> Result<RecoveredState, StoreError> {
        let mut recovered = RecoveredState::default();
        for target in self.scan()? {
            recovered.indices.note(&target);
            if target.state().is_running() {
                recovered.running.push(target.id.clone());
            }
        }
        recovered.indices.save(&self.indices_path())?;
        Ok(recovered)
    }

    /// Load the advisory indices (empty on missing/corrupt).
    pub fn load_indices(&self) -> Indices {
        Indices::load(&self.indices_path())
    }

    /// Persist the advisory indices.
    pub fn save_indices(&self, indices: &Indices) -> Result<(), StoreError> {
        indices.save(&self.indices_path())
    }
}

/// Write bytes durably: tmp file, fsync, rename, fsync the directory.
pub(crate) fn write_file_durable(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        io::Write::write_all(&mut file, bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        // Directory fsync makes the rename itself durable.
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
