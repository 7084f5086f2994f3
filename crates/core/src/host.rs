// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host values: where commands run.
//!
//! A `HostSpec` is pure serializable identity; the capability
//! implementations (run a command, put/get a file, ensure a directory)
//! live in `gantry-host`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SSH connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SshSpec {
    /// Login user; `None` defers to ssh config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Extra `ssh` options passed verbatim (e.g. `-o BatchMode=yes`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Cluster login node used as a ProxyJump hop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_node: Option<String>,
}

impl SshSpec {
    /// `user@host` destination as ssh expects it.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

/// Identity of an execution host.
///
/// Targets carry one of these: conditions are evaluated there and the
/// build process is started there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostSpec {
    Localhost,
    Ssh(SshSpec),
}

impl HostSpec {
    /// Parse a compact host address: `""`/`"localhost"`, or
    /// `[user@]host[:port]` for ssh.
    pub fn parse(address: &str) -> Self {
        if address.is_empty() || address == "localhost" {
            return HostSpec::Localhost;
        }
        let (user, rest) = match address.split_once('@') {
            Some((user, rest)) => (Some(user.to_string()), rest),
            None => (None, address),
        };
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(p) => (host.to_string(), Some(p)),
                Err(_) => (rest.to_string(), None),
            },
            None => (rest.to_string(), None),
        };
        HostSpec::Ssh(SshSpec {
            user,
            host,
            port,
            options: Vec::new(),
            login_node: None,
        })
    }

    /// Stable key for per-host resource pooling.
    pub fn pool_key(&self) -> String {
        self.to_string()
    }

    pub fn is_local(&self) -> bool {
        matches!(self, HostSpec::Localhost)
    }
}

impl Default for HostSpec {
    fn default() -> Self {
        HostSpec::Localhost
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostSpec::Localhost => write!(f, "localhost"),
            HostSpec::Ssh(spec) => {
                write!(f, "{}", spec.destination())?;
                if let Some(port) = spec.port {
                    write!(f, ":{}", port)?;
                }
                if let Some(ref jump) = spec.login_node {
                    write!(f, " via {}", jump)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
