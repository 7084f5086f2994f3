// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry-host: command and file capabilities over execution hosts.
//!
//! A [`Host`] is built from a serializable `HostSpec` and exposes the
//! capability set backends and the engine rely on: run a command, put
//! and get files, ensure a directory. Non-zero exit of the payload is
//! never an error here; only transport and filesystem faults are.

mod error;
mod local;
mod pool;
mod ssh;

pub use error::HostError;
pub use pool::HostPool;

use gantry_core::HostSpec;

/// Result of running a command on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit == 0
    }
}

/// A host with its capability set.
#[derive(Debug, Clone)]
pub struct Host {
    spec: HostSpec,
}

impl Host {
    pub fn from_spec(spec: HostSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &HostSpec {
        &self.spec
    }

    /// Run a command through the host's shell.
    ///
    /// Never fails on non-zero exit; only transport failure raises.
    pub async fn run_command(&self, command: &str) -> Result<RunOutput, HostError> {
        tracing::debug!(host = %self.spec, command, "run_command");
        match &self.spec {
            HostSpec::Localhost => local::run_command(command).await,
            HostSpec::Ssh(ssh) => ssh::run_command(ssh, command).await,
        }
    }

    /// Run an argv vector, quoting preserved (for quoting-sensitive
    /// backends).
    pub async fn execute(&self, argv: &[String]) -> Result<RunOutput, HostError> {
        tracing::debug!(host = %self.spec, argv = ?argv, "execute");
        match &self.spec {
            HostSpec::Localhost => local::execute(argv).await,
            HostSpec::Ssh(ssh) => ssh::execute(ssh, argv).await,
        }
    }

    /// Create `path` and any missing parents.
    pub async fn ensure_directory(&self, path: &str) -> Result<(), HostError> {
        tracing::debug!(host = %self.spec, path, "ensure_directory");
        match &self.spec {
            HostSpec::Localhost => local::ensure_directory(path).await,
            HostSpec::Ssh(ssh) => ssh::ensure_directory(ssh, path).await,
        }
    }

    /// Write `content` to `path`, replacing atomically.
    pub async fn put_file(&self, path: &str, content: &[u8]) -> Result<(), HostError> {
        tracing::debug!(host = %self.spec, path, bytes = content.len(), "put_file");
        match &self.spec {
            HostSpec::Localhost => local::put_file(path, content).await,
            HostSpec::Ssh(ssh) => ssh::put_file(ssh, path, content).await,
        }
    }

    /// Read `path` as bytes.
    pub async fn get_file(&self, path: &str) -> Result<Vec<u8>, HostError> {
        tracing::debug!(host = %self.spec, path, "get_file");
        match &self.spec {
            HostSpec::Localhost => local::get_file(path).await,
            HostSpec::Ssh(ssh) => ssh::get_file(ssh, path).await,
        }
    }
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
