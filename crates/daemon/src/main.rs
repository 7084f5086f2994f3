// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gantryd - the Gantry workflow engine daemon

use std::sync::Arc;

use gantry_daemon::lifecycle::{self, Config};
use gantry_daemon::listener::{ListenCtx, Listener};
use gantry_store::Store;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let Some(parent) = config.log_path.parent() else {
        return None;
    };
    let Some(file_name) = config.log_path.file_name() else {
        return None;
    };
    let appender = tracing_appender::rolling::never(parent, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gantryd: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = std::fs::create_dir_all(&config.db_root) {
        eprintln!("gantryd: cannot create {}: {}", config.db_root.display(), e);
        std::process::exit(1);
    }
    let _log_guard = init_tracing(&config);

    let state = match lifecycle::startup(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("startup failed: {}", e);
            eprintln!("gantryd: {}", e);
            lifecycle::cleanup(&config);
            std::process::exit(1);
        }
    };

    let engine = state.engine;
    let listener = state.listener;
    let shutdown = state.shutdown;
    let nudge = state.nudge;
    let step_rx = state.step_rx;
    let step_tx = state.step_tx;
    let start_time = state.start_time;
    let config = state.config;

    // The listener reads through its own store handle; all writes are
    // CAS-guarded, and mutations go through the command pipe anyway.
    let listen_store = match Store::open(&config.db_root) {
        Ok(store) => store,
        Err(e) => {
            error!("cannot reopen store for listener: {}", e);
            lifecycle::cleanup(&config);
            std::process::exit(1);
        }
    };

    let ctx = Arc::new(ListenCtx {
        store: listen_store,
        registry: gantry_backends::BackendRegistry::builtin(),
        command_log: engine.command_log(),
        auth_tokens: config.auth_tokens.clone(),
        nudge: Arc::clone(&nudge),
        shutdown: Arc::clone(&shutdown),
        step_tx,
        health: engine.health_handle(),
        start_time,
    });
    tokio::spawn(Listener::new(listener, ctx).run());

    // Ready for clients; the engine loop takes over this task.
    println!("READY");

    let idle = config.engine.idle_delay;
    let engine_shutdown = Arc::clone(&shutdown);
    let engine_handle = tokio::spawn(lifecycle::engine_task(
        engine,
        engine_shutdown,
        nudge,
        step_rx,
        idle,
    ));

    tokio::select! {
        result = engine_handle => {
            match result {
                Ok(Ok(())) => info!("engine task finished"),
                Ok(Err(e)) => {
                    // Store faults halt the loop and await the operator.
                    error!("engine halted: {}", e);
                    eprintln!("gantryd: engine halted: {}", e);
                }
                Err(e) => error!("engine task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            shutdown.notify_waiters();
        }
    }

    lifecycle::cleanup(&config);
    info!("daemon shutdown complete");
}
