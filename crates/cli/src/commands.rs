// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command implementations: `info`, `call`, `run`.

use crate::client::DaemonClient;
use crate::exit_error::ExitError;
use chrono::{TimeZone, Utc};
use gantry_backends::BackendRegistry;
use gantry_core::{SystemClock, TargetId, TargetSpec, TargetSummary, UuidIdGen, WhatHappened};
use gantry_daemon::lifecycle::Config;
use gantry_daemon::protocol::{Request, Response};
use gantry_engine::{Engine, EngineConfig};
use gantry_store::Store;
use std::sync::Arc;
use tokio::sync::Notify;

fn client(config: &Config) -> DaemonClient {
    let token = std::env::var("AUTH_TOKEN")
        .ok()
        .and_then(|raw| raw.split(',').next().map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty());
    DaemonClient::new(config.socket_path.clone(), token)
}

/// `gantry info`: daemon and database status.
pub async fn info(config: &Config) -> Result<(), ExitError> {
    println!("db root:   {}", config.db_root.display());
    println!("socket:    {}", config.socket_path.display());
    let response = client(config).request(Request::Status).await?;
    let Response::Status(report) = response else {
        return Err(ExitError::Engine("unexpected response to Status".into()));
    };
    println!("version:   {}", report.version);
    println!("uptime:    {}s", report.uptime_secs);
    println!(
        "targets:   {} total ({} activable, {} in-progress, {} successful, {} failed)",
        report.targets_total,
        report.activable,
        report.in_progress,
        report.successful,
        report.failed
    );
    if report.invariant_violations > 0 {
        println!("health:    {} invariant violations", report.invariant_violations);
    }
    Ok(())
}

fn print_summary(summary: &TargetSummary) {
    let created = Utc
        .timestamp_millis_opt(summary.created_at_ms as i64)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}  {:<28} {:<24} {}",
        summary.id.short(8),
        summary.state.name(),
        summary.name,
        created
    );
}

/// `gantry call <term> [args...]`: user-level API calls.
pub async fn call(config: &Config, term: &str, args: &[String]) -> Result<(), ExitError> {
    let client = client(config);
    match term {
        "ping" => {
            client.request(Request::Ping).await?;
            println!("pong");
            Ok(())
        }
        "submit" => {
            let [path] = args else {
                return Err(ExitError::Argument(
                    "usage: gantry call submit <targets.json>".into(),
                ));
            };
            let text = std::fs::read_to_string(path)
                .map_err(|e| ExitError::Argument(format!("cannot read {}: {}", path, e)))?;
            let specs: Vec<TargetSpec> = serde_json::from_str(&text)
                .map_err(|e| ExitError::Argument(format!("invalid target spec: {}", e)))?;
            let response = client.request(Request::Submit { targets: specs }).await?;
            let Response::Submitted { ids } = response else {
                return Err(ExitError::Engine("unexpected response to Submit".into()));
            };
            for id in ids {
                println!("{}", id);
            }
            Ok(())
        }
        "activate" | "kill" | "restart" => {
            if args.is_empty() {
                return Err(ExitError::Argument(format!(
                    "usage: gantry call {} <id>...",
                    term
                )));
            }
            let ids: Vec<TargetId> = args.iter().map(TargetId::new).collect();
            let request = match term {
                "activate" => Request::Activate { ids },
                "kill" => Request::Kill { ids },
                _ => Request::Restart { ids },
            };
            client.request(request).await?;
            println!("ok");
            Ok(())
        }
        "query" => {
            let filter = if args.is_empty() {
                "(all)".to_string()
            } else {
                args.join(" ")
            };
            let response = client.request(Request::Query { filter }).await?;
            let Response::Summaries { targets } = response else {
                return Err(ExitError::Engine("unexpected response to Query".into()));
            };
            for summary in &targets {
                print_summary(summary);
            }
            Ok(())
        }
        "get" => {
            let [id] = args else {
                return Err(ExitError::Argument("usage: gantry call get <id>".into()));
            };
            let response = client
                .request(Request::GetTarget {
                    id: TargetId::new(id),
                })
                .await?;
            let Response::Target { target } = response else {
                return Err(ExitError::Engine("unexpected response to GetTarget".into()));
            };
            let json = serde_json::to_string_pretty(&target)
                .map_err(|e| ExitError::Engine(e.to_string()))?;
            println!("{}", json);
            Ok(())
        }
        "artifact" => {
            let [id, name] = args else {
                return Err(ExitError::Argument(
                    "usage: gantry call artifact <id> <query-name>".into(),
                ));
            };
            let response = client
                .request(Request::GetArtifact {
                    id: TargetId::new(id),
                    query_name: name.clone(),
                })
                .await?;
            let Response::Artifact { bytes } = response else {
                return Err(ExitError::Engine("unexpected response to GetArtifact".into()));
            };
            use std::io::Write;
            std::io::stdout()
                .write_all(&bytes)
                .map_err(|e| ExitError::Engine(e.to_string()))?;
            Ok(())
        }
        "step" => {
            let response = client.request(Request::Step).await?;
            let Response::Happened { events } = response else {
                return Err(ExitError::Engine("unexpected response to Step".into()));
            };
            print_events(&events);
            Ok(())
        }
        "shutdown" => {
            client.request(Request::Shutdown).await?;
            println!("shutting down");
            Ok(())
        }
        other => Err(ExitError::NotImplemented(format!("call term '{}'", other))),
    }
}

fn print_events(events: &[WhatHappened]) {
    if events.is_empty() {
        println!("nothing happened");
        return;
    }
    for event in events {
        println!("{}", event.log_summary());
    }
}

/// Build a standalone engine over the configured db root.
fn standalone_engine(
    config: &Config,
) -> Result<Engine<SystemClock, UuidIdGen>, ExitError> {
    std::fs::create_dir_all(&config.db_root)
        .map_err(|e| ExitError::Engine(format!("cannot create db root: {}", e)))?;
    let store = Store::open(&config.db_root).map_err(|e| ExitError::Engine(e.to_string()))?;
    Engine::new(
        store,
        BackendRegistry::builtin(),
        SystemClock,
        UuidIdGen,
        EngineConfig::default(),
    )
    .map_err(|e| ExitError::Engine(e.to_string()))
}

/// `gantry run step`: one tick against the db root, no daemon.
pub async fn run_step(config: &Config) -> Result<(), ExitError> {
    let mut engine = standalone_engine(config)?;
    let events = engine
        .step()
        .await
        .map_err(|e| ExitError::Engine(e.to_string()))?;
    print_events(&events);
    Ok(())
}

/// `gantry run loop`: service mode until interrupted.
pub async fn run_loop(config: &Config) -> Result<(), ExitError> {
    let mut engine = standalone_engine(config)?;
    let shutdown = Arc::new(Notify::new());
    let nudge = Arc::new(Notify::new());

    let interrupt = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.notify_waiters();
        }
    });

    engine
        .run_loop(shutdown, nudge)
        .await
        .map_err(|e| ExitError::Engine(e.to_string()))
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
