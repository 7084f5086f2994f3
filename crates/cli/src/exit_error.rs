// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed exit codes for the CLI.
//!
//! 0 ok, 2 user-todo failure, 3 not implemented, 4 argument error,
//! 5 engine error, 6 wrong command.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExitError {
    /// Something the user has to fix (daemon not running, bad token,
    /// request refused).
    #[error("{0}")]
    UserTodo(String),

    /// A term or feature the CLI does not implement.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Bad arguments to a known command.
    #[error("{0}")]
    Argument(String),

    /// The engine refused or failed.
    #[error("engine error: {0}")]
    Engine(String),

    /// Unknown command.
    #[error("unknown command: {0}")]
    WrongCommand(String),
}

impl ExitError {
    pub fn code(&self) -> i32 {
        match self {
            ExitError::UserTodo(_) => 2,
            ExitError::NotImplemented(_) => 3,
            ExitError::Argument(_) => 4,
            ExitError::Engine(_) => 5,
            ExitError::WrongCommand(_) => 6,
        }
    }
}

#[cfg(test)]
#[path = "exit_error_tests.rs"]
mod tests;
