// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable command pipe.
//!
//! Line-oriented JSONL log of engine commands, fsync'd per append so an
//! acknowledged command survives a crash. The engine drains unprocessed
//! entries at the top of each tick and advances a durable offset once
//! their effects are applied; command effects are idempotent, so
//! re-draining after a crash is harmless.

use crate::store::{write_file_durable, StoreError};
use gantry_core::TargetId;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Side-channel commands accepted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum EngineCommand {
    Step,
    Kill { id: TargetId },
    Restart { id: TargetId },
    Activate { id: TargetId },
    Pause,
    Resume,
}

/// One logged command with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub seq: u64,
    #[serde(flatten)]
    pub command: EngineCommand,
}

/// Append-only command log with a durable processed offset.
pub struct CommandLog {
    file: File,
    path: PathBuf,
    offset_path: PathBuf,
    write_seq: u64,
    processed_seq: u64,
}

impl CommandLog {
    /// Open or create the log; scans for the highest sequence and reads
    /// the processed offset.
    pub fn open(path: &Path, offset_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let write_seq = Self::scan_max_seq(&file)?;
        let processed_seq = match std::fs::read_to_string(offset_path) {
            Ok(text) => text.trim().parse().unwrap_or(0),
            Err(_) => 0,
        };

        Ok(Self {
            file,
            path: path.to_owned(),
            offset_path: offset_path.to_owned(),
            write_seq,
            processed_seq,
        })
    }

    fn scan_max_seq(file: &File) -> Result<u64, StoreError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        let mut max_seq = 0u64;
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<CommandEntry>(trimmed) {
                Ok(entry) => max_seq = max_seq.max(entry.seq),
                Err(e) => {
                    warn!(error = %e, "skipping corrupt command log entry");
                }
            }
        }
        Ok(max_seq)
    }

    /// Append a command and fsync before returning its sequence.
    pub fn append(&mut self, command: EngineCommand) -> Result<u64, StoreError> {
        self.write_seq += 1;
        let entry = CommandEntry {
            seq: self.write_seq,
            command,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_all()?;
        Ok(entry.seq)
    }

    /// All entries past the processed offset, oldest first.
    ///
    /// Does not advance the offset; call [`CommandLog::mark_processed`]
    /// once the effects are durably applied.
    pub fn drain(&mut self) -> Result<Vec<CommandEntry>, StoreError> {
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<CommandEntry>(trimmed) {
                Ok(entry) if entry.seq > self.processed_seq => entries.push(entry),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "skipping corrupt command log entry");
                }
            }
        }
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    /// Durably record that everything up to `seq` has been applied.
    pub fn mark_processed(&mut self, seq: u64) -> Result<(), StoreError> {
        self.processed_seq = seq;
        write_file_durable(&self.offset_path, seq.to_string().as_bytes())
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
#[path = "command_log_tests.rs"]
mod tests;
