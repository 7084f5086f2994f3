// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry - workflow engine CLI

mod client;
mod commands;
mod exit_error;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use exit_error::ExitError;
use gantry_daemon::lifecycle::Config;

#[derive(Parser)]
#[command(
    name = "gantry",
    version,
    about = "Gantry - a workflow engine for heterogeneous compute"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon and database status
    Info,
    /// Issue a user-level API call (ping, submit, activate, kill,
    /// restart, query, get, artifact, step, shutdown)
    Call {
        /// The call term
        term: String,
        /// Term arguments
        args: Vec<String>,
    },
    /// Drive the engine without a daemon
    Run {
        #[command(subcommand)]
        mode: RunMode,
    },
}

#[derive(Subcommand)]
enum RunMode {
    /// Run exactly one tick and report what happened
    Step,
    /// Run the service loop until interrupted
    Loop,
}

async fn dispatch(cli: Cli) -> Result<(), ExitError> {
    let config = Config::load().map_err(|e| ExitError::UserTodo(e.to_string()))?;
    match cli.command {
        Commands::Info => commands::info(&config).await,
        Commands::Call { term, args } => commands::call(&config, &term, &args).await,
        Commands::Run { mode } => match mode {
            RunMode::Step => commands::run_step(&config).await,
            RunMode::Loop => commands::run_loop(&config).await,
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version are not errors.
            if matches!(
                e.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) {
                let _ = e.print();
                std::process::exit(0);
            }
            let code = match e.kind() {
                ErrorKind::InvalidSubcommand => 6,
                _ => 4,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(error) = dispatch(cli).await {
        eprintln!("gantry: {}", error);
        std::process::exit(error.code());
    }
}
