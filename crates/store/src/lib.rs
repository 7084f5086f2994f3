// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry-store: durable persistence for targets and engine commands.
//!
//! Targets live as fsync'd JSON files in a versioned envelope; writes
//! go through compare-and-set keyed by history length, and multi-target
//! transitions are journaled so they apply atomically across a crash.

mod command_log;
mod indices;
mod migration;
mod store;

pub use command_log::{CommandEntry, CommandLog, EngineCommand};
pub use indices::Indices;
pub use migration::{Migration, MigrationError, MigrationRegistry};
pub use store::{RecoveredState, Store, StoreError, TARGET_VERSION};
