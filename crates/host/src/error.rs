// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host capability errors.

use thiserror::Error;

/// Faults a host capability can raise.
///
/// The engine classifies `Unreachable` and `Timeout` as recoverable;
/// the rest are fatal for the target that triggered them.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host unreachable: {message}")]
    Unreachable { message: String },

    #[error("operation timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("filesystem error at {path}: {message}")]
    Filesystem { path: String, message: String },

    #[error("missing file: {path}")]
    MissingFile { path: String },

    #[error("invalid request: {message}")]
    Invalid { message: String },
}

impl HostError {
    /// Transient faults worth retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HostError::Unreachable { .. } | HostError::Timeout { .. }
        )
    }
}
