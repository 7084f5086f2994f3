// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine errors.

use thiserror::Error;

/// Errors that stop the engine loop.
///
/// Per-target faults never surface here; they become Failed-family
/// states or retries. What remains is the store (operator intervention
/// required) and programming errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] gantry_store::StoreError),

    #[error("unknown backend: {0}")]
    UnknownBackend(String),
}
