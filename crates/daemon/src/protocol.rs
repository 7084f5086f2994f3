// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control protocol for the daemon.
//!
//! The external HTTPS API translates its authenticated JSON messages
//! into these requests one-for-one; the CLI speaks them directly over
//! the Unix socket.

use gantry_core::{Target, TargetId, TargetSpec, TargetSummary, WhatHappened};
use serde::{Deserialize, Serialize};

/// A request plus its (optional) bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub request: Request,
}

/// Requests the core consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Health check ping
    Ping,

    /// Version handshake
    Hello { version: String },

    /// Submit targets; ids are assigned server-side.
    Submit { targets: Vec<TargetSpec> },

    /// Query target summaries with a filter expression.
    Query { filter: String },

    /// Fetch one full target record.
    GetTarget { id: TargetId },

    /// Request activation of passive targets.
    Activate { ids: Vec<TargetId> },

    /// Request kills.
    Kill { ids: Vec<TargetId> },

    /// Restart terminal targets (as fresh copies).
    Restart { ids: Vec<TargetId> },

    /// Fetch a named artifact stream from a target's backend.
    GetArtifact { id: TargetId, query_name: String },

    /// Run one engine tick and return what happened.
    Step,

    /// Daemon status.
    Status,

    /// Request daemon shutdown.
    Shutdown,
}

/// Daemon status summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub version: String,
    pub uptime_secs: u64,
    pub targets_total: usize,
    pub activable: usize,
    pub in_progress: usize,
    pub successful: usize,
    pub failed: usize,
    pub invariant_violations: u64,
}

/// Responses to the above.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Hello { version: String },
    Submitted { ids: Vec<TargetId> },
    Summaries { targets: Vec<TargetSummary> },
    Target { target: Box<Target> },
    Artifact { bytes: Vec<u8> },
    Happened { events: Vec<WhatHappened> },
    Status(Box<StatusReport>),
    Ok,
    ShuttingDown,
    Error { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
