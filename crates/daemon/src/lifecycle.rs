// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use gantry_backends::BackendRegistry;
use gantry_core::{SystemClock, UuidIdGen, WhatHappened};
use gantry_engine::{Engine, EngineConfig, EngineError};
use gantry_store::Store;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{info, warn};

/// The engine type the daemon runs.
pub type DaemonEngine = Engine<SystemClock, UuidIdGen>;

/// A request for one synchronous engine tick.
pub struct StepRequest {
    pub reply: oneshot::Sender<Vec<WhatHappened>>,
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database root (targets, indices, command log).
    pub db_root: PathBuf,
    /// Path to Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Accepted bearer tokens; empty means no auth required.
    pub auth_tokens: Vec<String>,
    /// Engine tuning.
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// `GANTRY_DB` (alias `DB_URI`) selects the db root, `GANTRY_SOCKET`
    /// the socket path, `AUTH_TOKEN` a comma-separated token list.
    /// `PORT` belongs to the external HTTPS layer and is ignored here.
    pub fn load() -> Result<Self, LifecycleError> {
        let db_root = std::env::var("GANTRY_DB")
            .or_else(|_| std::env::var("DB_URI"))
            .map(PathBuf::from)
            .unwrap_or(default_state_dir()?);

        let socket_path = std::env::var("GANTRY_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|_| db_root.join("gantryd.sock"));

        let auth_tokens = std::env::var("AUTH_TOKEN")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            lock_path: db_root.join("gantryd.pid"),
            log_path: db_root.join("gantryd.log"),
            socket_path,
            auth_tokens,
            engine: EngineConfig::default(),
            db_root,
        })
    }
}

fn default_state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("gantry"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/gantry"))
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] gantry_store::StoreError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Live daemon state handed to the runner.
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): held to maintain the exclusive pid lock;
    // released on drop.
    #[allow(dead_code)]
    lock_file: File,
    pub engine: DaemonEngine,
    pub listener: UnixListener,
    pub shutdown: Arc<Notify>,
    pub nudge: Arc<Notify>,
    pub step_rx: mpsc::Receiver<StepRequest>,
    pub step_tx: mpsc::Sender<StepRequest>,
    pub start_time: Instant,
}

impl std::fmt::Debug for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonState").finish_non_exhaustive()
    }
}

/// Start the daemon: lock, recover, bind.
pub async fn startup(config: Config) -> Result<DaemonState, LifecycleError> {
    std::fs::create_dir_all(&config.db_root)?;

    // Acquire the lock first; everything else belongs to the winner.
    // Avoid truncating before the lock is held, or we would wipe the
    // running daemon's pid.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    {
        use std::io::Write;
        let mut f = &lock_file;
        f.set_len(0)?;
        writeln!(f, "{}", std::process::id())?;
    }

    // Open the store and build the engine; Engine::new runs the
    // recovery scan and re-ingests running targets.
    let store = Store::open(&config.db_root)?;
    let engine = Engine::new(
        store,
        BackendRegistry::builtin(),
        SystemClock,
        UuidIdGen,
        config.engine.clone(),
    )?;

    // Bind last, when startup can no longer fail.
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    let (step_tx, step_rx) = mpsc::channel(16);

    info!(db = %config.db_root.display(), socket = %config.socket_path.display(), "daemon started");

    Ok(DaemonState {
        config,
        lock_file,
        engine,
        listener,
        shutdown: Arc::new(Notify::new()),
        nudge: Arc::new(Notify::new()),
        step_rx,
        step_tx,
        start_time: Instant::now(),
    })
}

/// The engine task: tick until quiescent, then wait for work.
///
/// Synchronous `Step` requests are answered with the events of exactly
/// one tick; nudges (new commands appended) wake the loop early.
pub async fn engine_task(
    mut engine: DaemonEngine,
    shutdown: Arc<Notify>,
    nudge: Arc<Notify>,
    mut step_rx: mpsc::Receiver<StepRequest>,
    idle_delay: std::time::Duration,
) -> Result<(), EngineError> {
    loop {
        // Drain all pending progress before idling.
        loop {
            let events = engine.step().await?;
            if !events.iter().any(WhatHappened::is_advancement) {
                break;
            }
        }

        tokio::select! {
            _ = shutdown.notified() => {
                info!("engine task shutting down");
                return Ok(());
            }
            request = step_rx.recv() => {
                if let Some(request) = request {
                    let events = engine.step().await?;
                    if request.reply.send(events).is_err() {
                        warn!("step requester went away before the reply");
                    }
                }
            }
            _ = nudge.notified() => {}
            _ = tokio::time::sleep(idle_delay) => {}
        }
    }
}

/// Remove daemon runtime files (socket, pid). The store stays.
pub fn cleanup(config: &Config) {
    if config.socket_path.exists() {
        if let Err(e) = std::fs::remove_file(&config.socket_path) {
            warn!("failed to remove socket file: {}", e);
        }
    }
    if config.lock_path.exists() {
        if let Err(e) = std::fs::remove_file(&config.lock_path) {
            warn!("failed to remove pid file: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
