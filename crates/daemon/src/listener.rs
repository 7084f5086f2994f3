// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! The listener runs as a spawned task, accepting connections and
//! handling them without blocking the engine task. Mutations flow
//! through the durable command pipe; queries read the store directly.

use std::sync::Arc;
use std::time::Instant;

use gantry_backends::{BackendRegistry, QueryError};
use gantry_core::{
    BuildProcess, Clock, IdGen, SystemClock, Target, TargetId, TargetSpec, UuidIdGen,
};
use gantry_engine::Health;
use gantry_filter::{compile_server_query, parse, CompiledFilter, TimeConstraint};
use gantry_host::Host;
use gantry_store::{CommandLog, EngineCommand, Store};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, warn};

use crate::lifecycle::StepRequest;
use crate::protocol::{Envelope, Request, Response, StatusReport};
use crate::wire::{self, ProtocolError, DEFAULT_TIMEOUT, PROTOCOL_VERSION};

/// Shared daemon context for all request handlers.
pub struct ListenCtx {
    pub store: Store,
    pub registry: BackendRegistry,
    pub command_log: Arc<Mutex<CommandLog>>,
    pub auth_tokens: Vec<String>,
    pub nudge: Arc<Notify>,
    pub shutdown: Arc<Notify>,
    pub step_tx: mpsc::Sender<StepRequest>,
    pub health: Arc<Mutex<Health>>,
    pub start_time: Instant,
}

/// Errors from connection handling.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Listener task for accepting socket connections.
pub struct Listener {
    socket: UnixListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(socket: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { socket, ctx }
    }

    /// Run the accept loop until the process exits, spawning a task
    /// per connection.
    pub async fn run(self) {
        loop {
            match self.socket.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &ctx).await {
                            match e {
                                ConnectionError::Protocol(ProtocolError::ConnectionClosed) => {
                                    debug!("client disconnected")
                                }
                                ConnectionError::Protocol(ProtocolError::Timeout) => {
                                    warn!("connection timeout")
                                }
                                _ => error!("connection error: {}", e),
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, ctx: &ListenCtx) -> Result<(), ConnectionError> {
    let (mut reader, mut writer) = stream.into_split();

    let envelope: Envelope = wire::read_with_timeout(&mut reader, DEFAULT_TIMEOUT).await?;

    if matches!(envelope.request, Request::Query { .. }) {
        debug!(request = ?envelope.request, "received query");
    } else {
        tracing::info!(request = ?envelope.request, "received request");
    }

    let response = handle_envelope(envelope, ctx).await;

    debug!("sending response: {:?}", response);
    wire::write_with_timeout(&mut writer, &response, DEFAULT_TIMEOUT).await?;
    Ok(())
}

/// Token check, then dispatch.
pub async fn handle_envelope(envelope: Envelope, ctx: &ListenCtx) -> Response {
    if !ctx.auth_tokens.is_empty() {
        let authorized = envelope
            .token
            .as_deref()
            .map(|token| ctx.auth_tokens.iter().any(|t| t == token))
            .unwrap_or(false);
        if !authorized {
            return Response::error("invalid auth token");
        }
    }
    handle_request(envelope.request, ctx).await
}

async fn handle_request(request: Request, ctx: &ListenCtx) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version: _ } => Response::Hello {
            version: PROTOCOL_VERSION.to_string(),
        },

        Request::Submit { targets } => submit(targets, ctx),

        Request::Query { filter } => query(&filter, ctx),

        Request::GetTarget { id } => match ctx.store.get(&id) {
            Ok(Some(target)) => Response::Target {
                target: Box::new(target),
            },
            Ok(None) => Response::error(format!("no such target: {}", id)),
            Err(e) => Response::error(e.to_string()),
        },

        Request::Activate { ids } => {
            enqueue_all(ctx, ids, |id| EngineCommand::Activate { id })
        }
        Request::Kill { ids } => enqueue_all(ctx, ids, |id| EngineCommand::Kill { id }),
        Request::Restart { ids } => {
            enqueue_all(ctx, ids, |id| EngineCommand::Restart { id })
        }

        Request::GetArtifact { id, query_name } => get_artifact(&id, &query_name, ctx).await,

        Request::Step => {
            let (reply, rx) = oneshot::channel();
            if ctx.step_tx.send(StepRequest { reply }).await.is_err() {
                return Response::error("engine task is gone");
            }
            match rx.await {
                Ok(events) => Response::Happened { events },
                Err(_) => Response::error("engine task dropped the step request"),
            }
        }

        Request::Status => status(ctx),

        Request::Shutdown => {
            ctx.shutdown.notify_waiters();
            Response::ShuttingDown
        }
    }
}

fn submit(specs: Vec<TargetSpec>, ctx: &ListenCtx) -> Response {
    let clock = SystemClock;
    let idgen = UuidIdGen;
    let mut prepared = Vec::with_capacity(specs.len());
    for mut spec in specs {
        // Backend configs are validated (and normalized into initial
        // run parameters) at submission time.
        if let BuildProcess::LongRunning {
            ref backend,
            ref mut run_parameters,
        } = spec.build_process
        {
            let Some(plugin) = ctx.registry.get(backend) else {
                return Response::error(format!("unknown backend: {}", backend));
            };
            match plugin.create(run_parameters.payload.clone()) {
                Ok(rp) => *run_parameters = rp,
                Err(e) => {
                    return Response::error(format!("backend {} rejected config: {}", backend, e))
                }
            }
        }
        prepared.push(spec);
    }

    let mut ids = Vec::with_capacity(prepared.len());
    for spec in prepared {
        let target = Target::create(TargetId::new(idgen.next()), spec, clock.epoch_ms());
        if let Err(e) = ctx.store.insert(&target) {
            return Response::error(e.to_string());
        }
        ids.push(target.id);
    }
    Response::Submitted { ids }
}

fn query(input: &str, ctx: &ListenCtx) -> Response {
    let filter = match parse(input) {
        Ok(filter) => filter,
        // Filter errors go back verbatim, location included.
        Err(e) => return Response::error(e.to_string()),
    };
    let now_ms = SystemClock.epoch_ms();
    let server_query = compile_server_query(&filter, now_ms);
    let compiled = match CompiledFilter::compile(&server_query.predicate) {
        Ok(compiled) => compiled,
        Err(e) => return Response::error(e.to_string()),
    };

    let targets = match ctx.store.scan() {
        Ok(targets) => targets,
        Err(e) => return Response::error(e.to_string()),
    };

    let summaries = targets
        .iter()
        .map(Target::summary)
        .filter(|summary| match server_query.time_constraint {
            Some(TimeConstraint::CreatedAfter(bound)) => summary.created_at_ms >= bound,
            None => true,
        })
        .filter(|summary| compiled.matches(summary, now_ms))
        .collect();
    Response::Summaries { targets: summaries }
}

fn enqueue_all(
    ctx: &ListenCtx,
    ids: Vec<TargetId>,
    make: impl Fn(TargetId) -> EngineCommand,
) -> Response {
    {
        let mut log = ctx.command_log.lock();
        for id in ids {
            if let Err(e) = log.append(make(id)) {
                return Response::error(e.to_string());
            }
        }
    }
    ctx.nudge.notify_waiters();
    Response::Ok
}

async fn get_artifact(id: &TargetId, query_name: &str, ctx: &ListenCtx) -> Response {
    let target = match ctx.store.get(id) {
        Ok(Some(target)) => target,
        Ok(None) => return Response::error(format!("no such target: {}", id)),
        Err(e) => return Response::error(e.to_string()),
    };
    let BuildProcess::LongRunning {
        ref backend,
        ref run_parameters,
    } = target.build_process
    else {
        return Response::error("target has no backend job");
    };
    let Some(plugin) = ctx.registry.get(backend) else {
        return Response::error(format!("unknown backend: {}", backend));
    };
    let host = Host::from_spec(target.host.clone());
    match plugin.query(run_parameters, &host, query_name).await {
        Ok(bytes) => Response::Artifact { bytes },
        Err(QueryError::UnknownItem { item }) => {
            let mut known: Vec<String> = gantry_backends::BASE_QUERIES
                .iter()
                .map(|s| s.to_string())
                .collect();
            known.extend(
                plugin
                    .additional_queries(run_parameters)
                    .into_iter()
                    .map(|(name, _)| name),
            );
            Response::error(format!(
                "unknown artifact {:?}; available: {}",
                item,
                known.join(", ")
            ))
        }
        Err(e) => Response::error(e.to_string()),
    }
}

fn status(ctx: &ListenCtx) -> Response {
    let targets = match ctx.store.scan() {
        Ok(targets) => targets,
        Err(e) => return Response::error(e.to_string()),
    };
    let mut report = StatusReport {
        version: PROTOCOL_VERSION.to_string(),
        uptime_secs: ctx.start_time.elapsed().as_secs(),
        targets_total: targets.len(),
        activable: 0,
        in_progress: 0,
        successful: 0,
        failed: 0,
        invariant_violations: ctx.health.lock().invariant_violations,
    };
    for target in &targets {
        use gantry_core::SimpleState;
        match target.simple_state() {
            SimpleState::Activable => report.activable += 1,
            SimpleState::InProgress => report.in_progress += 1,
            SimpleState::Successful => report.successful += 1,
            SimpleState::Failed => report.failed += 1,
        }
    }
    Response::Status(Box::new(report))
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
