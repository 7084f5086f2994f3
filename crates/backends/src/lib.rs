// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry-backends: execution backend plugins.
//!
//! A backend knows how to start, poll, and cancel a job on some
//! execution substrate. Plugins are compiled in and registered by name;
//! their run parameters are opaque versioned blobs that only the owning
//! backend reads or writes.

mod lsf;
mod pbs;
mod process;
mod registry;
pub mod script;
mod yarn;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use lsf::LsfBackend;
pub use pbs::PbsBackend;
pub use process::ProcessBackend;
pub use registry::BackendRegistry;
pub use yarn::YarnBackend;

use async_trait::async_trait;
use gantry_core::RunParameters;
use gantry_host::{Host, HostError};
use thiserror::Error;

/// Backend faults, split the way the engine consumes them: recoverable
/// faults leave the target in place for a retry, fatal ones fail it.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("recoverable: {0}")]
    Recoverable(String),
}

impl BackendError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BackendError::Recoverable(_))
    }
}

impl From<HostError> for BackendError {
    fn from(e: HostError) -> Self {
        if e.is_recoverable() {
            BackendError::Recoverable(e.to_string())
        } else {
            BackendError::Fatal(e.to_string())
        }
    }
}

/// Result of a submission attempt.
#[derive(Debug)]
pub enum StartOutcome {
    /// Submission accepted; the returned parameters record the job.
    Started(RunParameters),
    /// Permanent failure; the target fails.
    Fatal(String),
    /// Transient failure; the engine retries with backoff.
    Recoverable(String),
}

/// Result of polling a running job.
#[derive(Debug)]
pub enum Update {
    StillRunning(RunParameters),
    Succeeded(RunParameters),
    Failed(RunParameters, String),
}

/// Errors from diagnostic queries; never fatal to the target.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown query item: {item}")]
    UnknownItem { item: String },
    #[error("query failed: {0}")]
    Failed(String),
}

impl From<HostError> for QueryError {
    fn from(e: HostError) -> Self {
        QueryError::Failed(e.to_string())
    }
}

/// An execution backend plugin.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registry name (e.g. "pbs").
    fn name(&self) -> &'static str;

    /// Validate user config and produce initial run parameters.
    fn create(&self, config: serde_json::Value) -> Result<RunParameters, BackendError>;

    /// Submit the job to the substrate.
    async fn start(&self, rp: &RunParameters, host: &Host) -> StartOutcome;

    /// Poll a running job.
    async fn update(&self, rp: &RunParameters, host: &Host) -> Result<Update, BackendError>;

    /// Cancel the job. Idempotent: cancelling a job that is already
    /// gone succeeds.
    async fn kill(&self, rp: &RunParameters, host: &Host) -> Result<(), BackendError>;

    /// Fetch a named diagnostic stream (`stdout`, `stderr`, `log`,
    /// `script`, plus vendor extras).
    async fn query(
        &self,
        rp: &RunParameters,
        host: &Host,
        item: &str,
    ) -> Result<Vec<u8>, QueryError>;

    /// Vendor-specific query names with descriptions.
    fn additional_queries(&self, rp: &RunParameters) -> Vec<(String, String)>;
}

/// Standard diagnostic streams every cluster backend serves.
pub const BASE_QUERIES: [&str; 4] = ["stdout", "stderr", "log", "script"];
