// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine loop: discovery, classification, application.
//!
//! A tick drains the command pipe, loads the work set, computes one
//! action per target, fans backend/host I/O out to a bounded pool, and
//! applies the outcomes through compare-and-set writes. The engine is
//! the single writer of target history.

use crate::backoff::retry_delay;
use crate::condition::{self, ConditionError};
use crate::error::EngineError;
use gantry_backends::{Backend, BackendError, BackendRegistry, StartOutcome, Update};
use gantry_core::{
    ActivatedBy, Clock, Condition, IdGen, RunParameters, State, Target, TargetId, TargetSpec,
    WhatHappened,
};
use gantry_host::{Host, HostPool};
use gantry_store::{
    CommandLog, EngineCommand, Indices, Store, StoreError,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Engine tuning knobs; a value, passed in.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sleep between ticks when nothing advanced.
    pub idle_delay: Duration,
    /// In-flight backend operations per host.
    pub per_host_inflight: usize,
    /// In-flight backend operations across all hosts.
    pub total_inflight: usize,
    /// Concurrent sessions per host (connection pooling).
    pub max_sessions_per_host: usize,
    /// Deadline for backend `start`.
    pub start_deadline: Duration,
    /// Deadline for backend `update`, `kill`, and condition checks.
    pub update_deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_millis(500),
            per_host_inflight: 16,
            total_inflight: 64,
            max_sessions_per_host: 8,
            start_deadline: Duration::from_secs(300),
            update_deadline: Duration::from_secs(60),
        }
    }
}

/// Health counters surfaced to the control surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct Health {
    /// CAS mismatches and impossible states observed (logged, skipped).
    pub invariant_violations: u64,
}

/// What to do with one target this tick.
enum Class {
    Noop,
    Sync(SyncAction),
    Dispatch(DispatchKind),
}

enum SyncAction {
    Activate(ActivatedBy),
    KilledFromPassive,
    /// Killed before any backend job existed.
    KilledInactive,
    Dead(Vec<TargetId>),
    MadeToFail(TargetId),
    Redirect(TargetId),
    AdoptSuccess(TargetId),
    AdoptFailure(TargetId),
    /// No-op build process with no (remaining) condition: succeed.
    NoopSucceed,
    /// Verification with no condition is trivially true.
    VerifiedTrivially,
    /// Dependencies met, no skip condition: schedule the submission.
    ToTriedToStart,
}

enum DispatchKind {
    SkipCheck,
    Start,
    Poll,
    Verify,
    KillRunning,
}

/// One unit of work for the pool.
struct Dispatch {
    id: TargetId,
    expected_len: usize,
    kind: DispatchKind,
    host: Host,
    condition: Option<Condition>,
    backend: Option<Arc<dyn Backend>>,
    run_parameters: Option<RunParameters>,
}

/// Completed unit of work.
enum OpResult {
    SkipCheck(Result<bool, ConditionError>),
    Start(StartOutcome),
    Poll(Result<Update, BackendError>),
    Verify(Result<bool, ConditionError>),
    Kill(Result<(), BackendError>),
}

/// The single-writer scheduler.
pub struct Engine<C: Clock, G: IdGen> {
    store: Store,
    command_log: Arc<Mutex<CommandLog>>,
    registry: BackendRegistry,
    clock: C,
    idgen: G,
    config: EngineConfig,
    indices: Indices,
    sessions: Arc<HostPool>,
    op_slots: Arc<HostPool>,
    global_slots: Arc<Semaphore>,
    kill_requests: BTreeSet<TargetId>,
    activate_requests: BTreeSet<TargetId>,
    retry_at: HashMap<TargetId, Instant>,
    paused: bool,
    health: Arc<Mutex<Health>>,
}

impl<C: Clock, G: IdGen> Engine<C, G> {
    /// Build an engine over an open store, running the recovery scan.
    ///
    /// Targets found in a Running-family state re-enter the work set
    /// and resume polling on the first tick.
    pub fn new(
        store: Store,
        registry: BackendRegistry,
        clock: C,
        idgen: G,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let command_log = Arc::new(Mutex::new(CommandLog::open(
            &store.command_log_path(),
            &store.command_offset_path(),
        )?));
        let recovered = store.recovery_scan()?;
        if !recovered.running.is_empty() {
            info!(
                count = recovered.running.len(),
                "re-ingesting running targets after recovery scan"
            );
        }
        Ok(Self {
            sessions: Arc::new(HostPool::new(config.max_sessions_per_host)),
            op_slots: Arc::new(HostPool::new(config.per_host_inflight)),
            global_slots: Arc::new(Semaphore::new(config.total_inflight)),
            indices: recovered.indices,
            store,
            command_log,
            registry,
            clock,
            idgen,
            config,
            kill_requests: BTreeSet::new(),
            activate_requests: BTreeSet::new(),
            retry_at: HashMap::new(),
            paused: false,
            health: Arc::new(Mutex::new(Health::default())),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Shared handle to the command pipe; the control surface appends,
    /// the engine drains.
    pub fn command_log(&self) -> Arc<Mutex<CommandLog>> {
        Arc::clone(&self.command_log)
    }

    /// Append a command to the pipe (durable before return).
    pub fn enqueue(&self, command: EngineCommand) -> Result<u64, EngineError> {
        Ok(self.command_log.lock().append(command)?)
    }

    pub fn health(&self) -> Health {
        *self.health.lock()
    }

    /// Shared handle for health reporting from other tasks.
    pub fn health_handle(&self) -> Arc<Mutex<Health>> {
        Arc::clone(&self.health)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn now_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }

    /// Run one tick and report what happened.
    pub async fn step(&mut self) -> Result<Vec<WhatHappened>, EngineError> {
        let mut events = Vec::new();

        let entries = self.command_log.lock().drain()?;
        let max_seq = entries.last().map(|e| e.seq);
        for entry in entries {
            self.apply_command(entry.command, &mut events)?;
        }

        if !self.paused {
            self.tick(&mut events).await?;
        }

        if let Some(seq) = max_seq {
            self.command_log.lock().mark_processed(seq)?;
        }
        self.store.save_indices(&self.indices)?;
        Ok(events)
    }

    /// Service mode: repeat `step`, idling only when nothing advanced.
    pub async fn run_loop(
        &mut self,
        shutdown: Arc<Notify>,
        nudge: Arc<Notify>,
    ) -> Result<(), EngineError> {
        loop {
            let events = self.step().await?;
            for event in &events {
                debug!(event = %event.log_summary(), "tick event");
            }
            if events.iter().any(WhatHappened::is_advancement) {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = shutdown.notified() => return Ok(()),
                _ = nudge.notified() => {}
                _ = tokio::time::sleep(self.config.idle_delay) => {}
            }
        }
    }

    fn apply_command(
        &mut self,
        command: EngineCommand,
        events: &mut Vec<WhatHappened>,
    ) -> Result<(), EngineError> {
        match command {
            EngineCommand::Step => {}
            EngineCommand::Kill { id } => {
                self.kill_requests.insert(id);
            }
            EngineCommand::Activate { id } => {
                self.activate_requests.insert(id);
            }
            EngineCommand::Restart { id } => self.restart_target(&id, events)?,
            EngineCommand::Pause => {
                info!("engine paused");
                self.paused = true;
            }
            EngineCommand::Resume => {
                info!("engine resumed");
                self.paused = false;
            }
        }
        Ok(())
    }

    /// Restart duplicates a terminal target under a fresh id and
    /// activates the copy; the original history stays immutable.
    fn restart_target(
        &mut self,
        id: &TargetId,
        events: &mut Vec<WhatHappened>,
    ) -> Result<(), EngineError> {
        let Some(original) = self.store.get(id)? else {
            warn!(id = %id, "restart: no such target");
            return Ok(());
        };
        if !original.is_finished() {
            debug!(id = %id, "restart: target still in progress, ignoring");
            return Ok(());
        }
        let spec = TargetSpec {
            name: original.name.clone(),
            tags: original.tags.clone(),
            metadata: original.metadata.clone(),
            depends_on: original.depends_on.clone(),
            make_fail_if: original.make_fail_if.clone(),
            success_triggers: original.success_triggers.clone(),
            fallbacks: original.fallbacks.clone(),
            condition: original.condition.clone(),
            equivalence: original.equivalence,
            build_process: original.build_process.clone(),
            host: original.host.clone(),
        };
        let now = self.now_ms();
        let mut replacement = Target::create(TargetId::new(self.idgen.next()), spec, now);
        // Fresh Passive history; activation is what the caller wanted.
        let _ = replacement.push_state(
            State::Active {
                by: ActivatedBy::User,
            },
            now,
        );
        info!(original = %id, replacement = %replacement.id, "restarting target as a fresh copy");
        self.store.insert(&replacement)?;
        self.indices.note(&replacement);
        events.push(WhatHappened::Activated {
            id: replacement.id,
            by: ActivatedBy::User,
        });
        Ok(())
    }

    async fn tick(&mut self, events: &mut Vec<WhatHappened>) -> Result<(), EngineError> {
        // Phase 1: discovery.
        let mut ids = self.indices.work_set();
        ids.extend(self.kill_requests.iter().cloned());
        ids.extend(self.activate_requests.iter().cloned());

        let mut targets: BTreeMap<TargetId, Target> = BTreeMap::new();
        for id in &ids {
            match self.store.get(id)? {
                Some(target) => {
                    targets.insert(id.clone(), target);
                }
                None => warn!(id = %id, "work set names a missing target"),
            }
        }

        // Idempotent kills: a request naming a terminal (or missing)
        // target has nothing left to do.
        self.kill_requests.retain(|id| {
            targets
                .get(id)
                .map(|t| !t.is_finished())
                .unwrap_or(false)
        });

        // Phase 2: classification.
        let mut dispatches = Vec::new();
        let mut sync_actions = Vec::new();
        for target in targets.values() {
            // Activation pulls Passive dependencies along; the child
            // then waits for them like any other in-progress dep.
            if matches!(target.state(), State::Active { .. }) {
                for dep in &target.depends_on {
                    if let Some(t) = self.lookup(dep, &targets)? {
                        if matches!(t.state(), State::Passive) {
                            sync_actions.push((
                                dep.clone(),
                                SyncAction::Activate(ActivatedBy::Parent {
                                    id: target.id.clone(),
                                }),
                            ));
                        }
                    }
                }
            }
            match self.classify(target, &targets)? {
                Class::Noop => {}
                Class::Sync(action) => sync_actions.push((target.id.clone(), action)),
                Class::Dispatch(kind) => {
                    if let Some(dispatch) = self.build_dispatch(target, kind, events)? {
                        dispatches.push(dispatch);
                    }
                }
            }
        }

        for (id, action) in sync_actions {
            // Reload: a previous action this tick (e.g. a
            // parent's triggers) may have advanced this target.
            let Some(target) = self.store.get(&id)? else {
                continue;
            };
            self.apply_sync(target, action, events)?;
        }

        // Phase 3: application (bounded-concurrency I/O).
        self.run_dispatches(dispatches, events).await?;

        self.activate_requests.clear();
        Ok(())
    }

    fn classify(
        &self,
        target: &Target,
        fetched: &BTreeMap<TargetId, Target>,
    ) -> Result<Class, EngineError> {
        let state = target.state();

        if state.is_terminal() {
            return Ok(Class::Noop);
        }

        if self.kill_requests.contains(&target.id) {
            return Ok(match state {
                State::Passive => Class::Sync(SyncAction::KilledFromPassive),
                State::StartedRunning | State::StillBuilding | State::StillVerifyingSuccess
                    if target.has_backend_job() =>
                {
                    Class::Dispatch(DispatchKind::KillRunning)
                }
                _ => Class::Sync(SyncAction::KilledInactive),
            });
        }

        // make_fail_if is checked every tick once the target has left
        // Passive; it trumps fallbacks (and everything else).
        if !matches!(state, State::Passive) {
            for cause in &target.make_fail_if {
                if let Some(t) = self.lookup(cause, fetched)? {
                    if t.state().is_failed() {
                        return Ok(Class::Sync(SyncAction::MadeToFail(cause.clone())));
                    }
                }
            }
        }

        Ok(match state {
            State::Passive => {
                if self.activate_requests.contains(&target.id) {
                    Class::Sync(SyncAction::Activate(ActivatedBy::User))
                } else {
                    Class::Noop
                }
            }
            State::Active { .. } => self.classify_active(target, fetched)?,
            State::TriedToStart { .. } => match self.retry_at.get(&target.id) {
                Some(at) if *at > self.clock.now() => Class::Noop,
                _ => Class::Dispatch(DispatchKind::Start),
            },
            State::StartedRunning | State::StillBuilding => Class::Dispatch(DispatchKind::Poll),
            State::StillVerifyingSuccess => match &target.condition {
                Some(_) => Class::Dispatch(DispatchKind::Verify),
                None => Class::Sync(SyncAction::VerifiedTrivially),
            },
            State::Redirected { to } => match self.lookup(to, fetched)? {
                Some(pointee) if pointee.state().is_successful() => {
                    Class::Sync(SyncAction::AdoptSuccess(to.clone()))
                }
                Some(pointee) if pointee.state().is_failed() => {
                    Class::Sync(SyncAction::AdoptFailure(to.clone()))
                }
                Some(_) => Class::Noop,
                None => Class::Sync(SyncAction::AdoptFailure(to.clone())),
            },
            // Terminal handled above.
            _ => Class::Noop,
        })
    }

    fn classify_active(
        &self,
        target: &Target,
        fetched: &BTreeMap<TargetId, Target>,
    ) -> Result<Class, EngineError> {
        let mut failed_deps = Vec::new();
        let mut pending = false;
        for dep in &target.depends_on {
            match self.lookup(dep, fetched)? {
                Some(t) if t.state().is_successful() => {}
                Some(t) if t.state().is_failed() => failed_deps.push(dep.clone()),
                Some(_) => pending = true,
                // A vanished dependency can never succeed.
                None => failed_deps.push(dep.clone()),
            }
        }
        if !failed_deps.is_empty() {
            return Ok(Class::Sync(SyncAction::Dead(failed_deps)));
        }
        if pending {
            return Ok(Class::Noop);
        }

        // Dependencies met. Equivalence first: an in-progress twin with
        // the same active condition absorbs this target.
        if let Some(pointee) = self.equivalence_candidate(target, fetched) {
            return Ok(Class::Sync(SyncAction::Redirect(pointee)));
        }

        if target.condition.is_some() {
            return Ok(Class::Dispatch(DispatchKind::SkipCheck));
        }
        Ok(match &target.build_process {
            gantry_core::BuildProcess::NoOperation => Class::Sync(SyncAction::NoopSucceed),
            gantry_core::BuildProcess::LongRunning { .. } => {
                Class::Sync(SyncAction::ToTriedToStart)
            }
        })
    }

    /// Pick an earlier, in-progress target with the same active
    /// condition. Ordering by (created_at, id) keeps two twins
    /// activated in the same tick from redirecting to each other.
    fn equivalence_candidate(
        &self,
        target: &Target,
        fetched: &BTreeMap<TargetId, Target>,
    ) -> Option<TargetId> {
        use gantry_core::Equivalence;
        if target.equivalence != Equivalence::SameActiveCondition {
            return None;
        }
        let condition = target.condition.as_ref()?;
        let print = condition::fingerprint(condition);
        let mut best: Option<&Target> = None;
        for candidate in fetched.values() {
            if candidate.id == target.id
                || candidate.equivalence != Equivalence::SameActiveCondition
                || matches!(candidate.state(), State::Redirected { .. })
            {
                continue;
            }
            let in_progress = matches!(candidate.state(), State::Active { .. })
                || candidate.state().is_running();
            if !in_progress {
                continue;
            }
            let Some(theirs) = candidate.condition.as_ref() else {
                continue;
            };
            if condition::fingerprint(theirs) != print {
                continue;
            }
            let earlier = (candidate.created_at_ms(), &candidate.id)
                < (target.created_at_ms(), &target.id);
            if earlier
                && best
                    .map(|b| (candidate.created_at_ms(), &candidate.id) < (b.created_at_ms(), &b.id))
                    .unwrap_or(true)
            {
                best = Some(candidate);
            }
        }
        best.map(|t| t.id.clone())
    }

    fn lookup(
        &self,
        id: &TargetId,
        fetched: &BTreeMap<TargetId, Target>,
    ) -> Result<Option<Target>, EngineError> {
        if let Some(target) = fetched.get(id) {
            return Ok(Some(target.clone()));
        }
        Ok(self.store.get(id)?)
    }

    fn build_dispatch(
        &mut self,
        target: &Target,
        kind: DispatchKind,
        events: &mut Vec<WhatHappened>,
    ) -> Result<Option<Dispatch>, EngineError> {
        let host = Host::from_spec(target.host.clone());
        let (backend, run_parameters) = match &target.build_process {
            gantry_core::BuildProcess::LongRunning {
                backend,
                run_parameters,
            } => match self.registry.get(backend) {
                Some(plugin) => (Some(plugin), Some(run_parameters.clone())),
                None => {
                    // Compiled-in registry has no such plugin; nothing
                    // will ever run this target.
                    self.fail_starting(
                        target.clone(),
                        format!("unknown backend: {}", backend),
                        events,
                    )?;
                    return Ok(None);
                }
            },
            gantry_core::BuildProcess::NoOperation => (None, None),
        };

        let needs_backend = matches!(
            kind,
            DispatchKind::Start | DispatchKind::Poll | DispatchKind::KillRunning
        );
        if needs_backend && backend.is_none() {
            // Impossible state observed: running family without a
            // backend job. Log, count, skip.
            self.health.lock().invariant_violations += 1;
            warn!(id = %target.id, state = ?target.state().kind(), "running state without backend");
            events.push(WhatHappened::Skipped {
                id: target.id.clone(),
                reason: "running state without backend".to_string(),
            });
            return Ok(None);
        }

        Ok(Some(Dispatch {
            id: target.id.clone(),
            expected_len: target.history.len(),
            kind,
            host,
            condition: target.condition.clone(),
            backend,
            run_parameters,
        }))
    }

    async fn run_dispatches(
        &mut self,
        dispatches: Vec<Dispatch>,
        events: &mut Vec<WhatHappened>,
    ) -> Result<(), EngineError> {
        let mut join: JoinSet<(TargetId, usize, OpResult)> = JoinSet::new();
        let start_deadline = self.config.start_deadline;
        let update_deadline = self.config.update_deadline;

        for dispatch in dispatches {
            // Backpressure: no free slot means the transition stays
            // pending and is reclassified next tick.
            let Ok(global) = Arc::clone(&self.global_slots).try_acquire_owned() else {
                debug!(id = %dispatch.id, "global in-flight cap reached, deferring");
                continue;
            };
            let Some(host_slot) = self.op_slots.try_acquire(dispatch.host.spec()) else {
                debug!(id = %dispatch.id, "per-host in-flight cap reached, deferring");
                continue;
            };
            let sessions = Arc::clone(&self.sessions);

            join.spawn(async move {
                let _global = global;
                let _host_slot = host_slot;
                let _session = sessions.acquire(dispatch.host.spec()).await;
                let Dispatch {
                    id,
                    expected_len,
                    kind,
                    host,
                    condition,
                    backend,
                    run_parameters,
                } = dispatch;
                let result = match kind {
                    DispatchKind::SkipCheck => {
                        let result = match condition {
                            Some(ref cond) => {
                                run_condition(cond, &host, update_deadline).await
                            }
                            None => Ok(false),
                        };
                        OpResult::SkipCheck(result)
                    }
                    DispatchKind::Verify => {
                        let result = match condition {
                            Some(ref cond) => {
                                run_condition(cond, &host, update_deadline).await
                            }
                            None => Ok(true),
                        };
                        OpResult::Verify(result)
                    }
                    DispatchKind::Start => {
                        let (backend, rp) = (backend.expect_present(), rp_present(run_parameters));
                        let outcome =
                            match tokio::time::timeout(start_deadline, backend.start(&rp, &host))
                                .await
                            {
                                Ok(outcome) => outcome,
                                Err(_) => StartOutcome::Recoverable(format!(
                                    "start timed out after {:?}",
                                    start_deadline
                                )),
                            };
                        OpResult::Start(outcome)
                    }
                    DispatchKind::Poll => {
                        let (backend, rp) = (backend.expect_present(), rp_present(run_parameters));
                        let result =
                            match tokio::time::timeout(update_deadline, backend.update(&rp, &host))
                                .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(BackendError::Recoverable(format!(
                                    "update timed out after {:?}",
                                    update_deadline
                                ))),
                            };
                        OpResult::Poll(result)
                    }
                    DispatchKind::KillRunning => {
                        let (backend, rp) = (backend.expect_present(), rp_present(run_parameters));
                        let result =
                            match tokio::time::timeout(update_deadline, backend.kill(&rp, &host))
                                .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(BackendError::Recoverable(format!(
                                    "kill timed out after {:?}",
                                    update_deadline
                                ))),
                            };
                        OpResult::Kill(result)
                    }
                };
                (id, expected_len, result)
            });
        }

        while let Some(joined) = join.join_next().await {
            let Ok((id, expected_len, result)) = joined else {
                warn!("worker task panicked or was cancelled");
                continue;
            };
            self.apply_op_result(id, expected_len, result, events)?;
        }
        Ok(())
    }

    // ── Outcome application ────────────────────────────────────────────

    fn apply_sync(
        &mut self,
        mut target: Target,
        action: SyncAction,
        events: &mut Vec<WhatHappened>,
    ) -> Result<(), EngineError> {
        let expected = target.history.len();
        match action {
            SyncAction::Activate(by) => {
                // Another action this tick (a parent's trigger) may have
                // activated it already; explicit activation is idempotent.
                if !matches!(target.state(), State::Passive) {
                    return Ok(());
                }
                if self.push_and_cas(&mut target, State::Active { by: by.clone() }, expected)? {
                    events.push(WhatHappened::Activated { id: target.id, by });
                }
            }
            SyncAction::KilledFromPassive => {
                if self.push_and_cas(&mut target, State::KilledFromPassive, expected)? {
                    self.kill_requests.remove(&target.id);
                    events.push(WhatHappened::KilledFromPassive { id: target.id });
                }
            }
            SyncAction::KilledInactive => {
                if self.push_and_cas(&mut target, State::Killed, expected)? {
                    self.kill_requests.remove(&target.id);
                    events.push(WhatHappened::Killed { id: target.id });
                }
            }
            SyncAction::Dead(failed) => {
                let state = State::DeadBecauseOfDependencies {
                    failed: failed.clone(),
                };
                if self.push_and_cas(&mut target, state, expected)? {
                    events.push(WhatHappened::DependenciesDied {
                        id: target.id,
                        failed,
                    });
                }
            }
            SyncAction::MadeToFail(cause) => {
                let state = State::FailedFromRunning {
                    reason: format!("make-fail-if triggered by {}", cause),
                };
                // make_fail_if trumps fallbacks: no fallback firing.
                if self.push_and_cas(&mut target, state, expected)? {
                    events.push(WhatHappened::MadeToFail {
                        id: target.id,
                        cause,
                    });
                }
            }
            SyncAction::Redirect(to) => {
                let state = State::Redirected { to: to.clone() };
                if self.push_and_cas(&mut target, state, expected)? {
                    events.push(WhatHappened::Redirected { id: target.id, to });
                }
            }
            SyncAction::AdoptSuccess(from) => {
                events.push(WhatHappened::AdoptedOutcome {
                    id: target.id.clone(),
                    from,
                });
                self.succeed(target, State::RanSuccessfully, expected, events)?;
            }
            SyncAction::AdoptFailure(from) => {
                events.push(WhatHappened::AdoptedOutcome {
                    id: target.id.clone(),
                    from: from.clone(),
                });
                let state = State::FailedFromRunning {
                    reason: format!("adopted failure from {}", from),
                };
                self.fail(target, state, expected, events)?;
            }
            SyncAction::NoopSucceed => {
                self.succeed(target, State::RanSuccessfully, expected, events)?;
            }
            SyncAction::VerifiedTrivially => {
                self.succeed(target, State::RanSuccessfully, expected, events)?;
            }
            SyncAction::ToTriedToStart => {
                if self.push_and_cas(&mut target, State::TriedToStart { attempt: 1 }, expected)? {
                    events.push(WhatHappened::StartScheduled { id: target.id });
                }
            }
        }
        Ok(())
    }

    fn apply_op_result(
        &mut self,
        id: TargetId,
        expected_len: usize,
        result: OpResult,
        events: &mut Vec<WhatHappened>,
    ) -> Result<(), EngineError> {
        let Some(mut target) = self.store.get(&id)? else {
            warn!(id = %id, "target vanished while an operation was in flight");
            return Ok(());
        };

        match result {
            OpResult::SkipCheck(Ok(true)) => {
                events.push(WhatHappened::ConditionSatisfied { id: target.id.clone() });
                self.succeed(target, State::AlreadyDone, expected_len, events)?;
            }
            OpResult::SkipCheck(Ok(false)) => match &target.build_process {
                gantry_core::BuildProcess::LongRunning { .. } => {
                    if self.push_and_cas(
                        &mut target,
                        State::TriedToStart { attempt: 1 },
                        expected_len,
                    )? {
                        events.push(WhatHappened::StartScheduled { id: target.id });
                    }
                }
                gantry_core::BuildProcess::NoOperation => {
                    events.push(WhatHappened::FailedCondition { id: target.id.clone() });
                    self.fail(target, State::FailedFromCondition, expected_len, events)?;
                }
            },
            OpResult::SkipCheck(Err(ConditionError::Recoverable(message))) => {
                debug!(id = %id, %message, "skip check deferred");
            }
            OpResult::SkipCheck(Err(ConditionError::Fatal(message))) => {
                warn!(id = %id, %message, "condition unevaluable");
                events.push(WhatHappened::FailedCondition { id: target.id.clone() });
                self.fail(target, State::FailedFromCondition, expected_len, events)?;
            }

            OpResult::Start(StartOutcome::Started(rp)) => {
                target.set_run_parameters(rp);
                self.retry_at.remove(&target.id);
                if self.push_and_cas(&mut target, State::StartedRunning, expected_len)? {
                    events.push(WhatHappened::Started { id: target.id });
                }
            }
            OpResult::Start(StartOutcome::Fatal(reason)) => {
                events.push(WhatHappened::StartFailed {
                    id: target.id.clone(),
                    reason: reason.clone(),
                });
                self.fail(target, State::FailedFromStarting { reason }, expected_len, events)?;
            }
            OpResult::Start(StartOutcome::Recoverable(reason)) => {
                let attempt = target.latest_attempt();
                let next = attempt + 1;
                let delay = retry_delay(attempt.max(1));
                debug!(id = %id, attempt, %reason, ?delay, "start failed, will retry");
                if self.push_and_cas(
                    &mut target,
                    State::TriedToStart { attempt: next },
                    expected_len,
                )? {
                    self.retry_at
                        .insert(id.clone(), self.clock.now() + delay);
                    events.push(WhatHappened::StartRetried { id, attempt: next });
                }
            }

            OpResult::Poll(Ok(Update::StillRunning(rp))) => {
                let advanced = matches!(target.state(), State::StartedRunning);
                target.set_run_parameters(rp);
                if advanced {
                    self.push_and_cas(&mut target, State::StillBuilding, expected_len)?;
                } else {
                    // Run parameters may have been refreshed (invariant:
                    // mutated only while Running); persist under CAS.
                    self.cas_in_place(&target, expected_len)?;
                }
                events.push(WhatHappened::StillRunning { id });
            }
            OpResult::Poll(Ok(Update::Succeeded(rp))) => {
                target.set_run_parameters(rp);
                if self.push_and_cas(&mut target, State::StillVerifyingSuccess, expected_len)? {
                    events.push(WhatHappened::RunFinished { id });
                }
            }
            OpResult::Poll(Ok(Update::Failed(rp, reason))) => {
                target.set_run_parameters(rp);
                events.push(WhatHappened::FailedRunning {
                    id: target.id.clone(),
                    reason: reason.clone(),
                });
                self.fail(target, State::FailedFromRunning { reason }, expected_len, events)?;
            }
            OpResult::Poll(Err(BackendError::Recoverable(message))) => {
                debug!(id = %id, %message, "poll deferred");
            }
            OpResult::Poll(Err(BackendError::Fatal(reason))) => {
                events.push(WhatHappened::FailedRunning {
                    id: target.id.clone(),
                    reason: reason.clone(),
                });
                self.fail(target, State::FailedFromRunning { reason }, expected_len, events)?;
            }

            OpResult::Verify(Ok(true)) => {
                self.succeed(target, State::RanSuccessfully, expected_len, events)?;
            }
            OpResult::Verify(Ok(false)) => {
                events.push(WhatHappened::FailedCondition { id: target.id.clone() });
                self.fail(target, State::FailedFromCondition, expected_len, events)?;
            }
            OpResult::Verify(Err(ConditionError::Recoverable(message))) => {
                debug!(id = %id, %message, "verification deferred");
            }
            OpResult::Verify(Err(ConditionError::Fatal(message))) => {
                warn!(id = %id, %message, "verification unevaluable");
                events.push(WhatHappened::FailedCondition { id: target.id.clone() });
                self.fail(target, State::FailedFromCondition, expected_len, events)?;
            }

            OpResult::Kill(Ok(())) | OpResult::Kill(Err(BackendError::Fatal(_))) => {
                // A fatal cancel means the job is not there to cancel;
                // either way the target is killed.
                if self.push_and_cas(&mut target, State::Killed, expected_len)? {
                    self.kill_requests.remove(&id);
                    events.push(WhatHappened::Killed { id });
                }
            }
            OpResult::Kill(Err(BackendError::Recoverable(message))) => {
                debug!(id = %id, %message, "kill deferred, request stays");
            }
        }
        Ok(())
    }

    /// CAS-append a state; a mismatch is logged, counted, and skipped.
    /// Returns whether the write landed.
    fn push_and_cas(
        &mut self,
        target: &mut Target,
        state: State,
        expected: usize,
    ) -> Result<bool, EngineError> {
        let now = self.now_ms();
        if let Err(e) = target.push_state(state, now) {
            self.skip_invariant(&target.id, &e.to_string());
            return Ok(false);
        }
        match self.store.compare_and_set(target, expected) {
            Ok(()) => {
                self.indices.note(target);
                Ok(true)
            }
            Err(StoreError::CasMismatch { id, expected, actual }) => {
                self.skip_invariant(
                    &id,
                    &format!("cas mismatch (expected {}, actual {})", expected, actual),
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist run-parameter changes without a state transition.
    fn cas_in_place(&mut self, target: &Target, expected: usize) -> Result<(), EngineError> {
        match self.store.compare_and_set(target, expected) {
            Ok(()) => Ok(()),
            Err(StoreError::CasMismatch { id, expected, actual }) => {
                self.skip_invariant(
                    &id,
                    &format!("cas mismatch (expected {}, actual {})", expected, actual),
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn skip_invariant(&mut self, id: &TargetId, reason: &str) {
        self.health.lock().invariant_violations += 1;
        warn!(id = %id, reason, "invariant violation, skipping target");
    }

    /// Terminal success: the target write and its `success_triggers`
    /// activations land in one atomic batch.
    fn succeed(
        &mut self,
        mut target: Target,
        state: State,
        expected: usize,
        events: &mut Vec<WhatHappened>,
    ) -> Result<(), EngineError> {
        let now = self.now_ms();
        if let Err(e) = target.push_state(state, now) {
            self.skip_invariant(&target.id, &e.to_string());
            return Ok(());
        }
        let (batch, expectations, children) =
            self.collect_activations(&target, expected, &target.success_triggers.clone())?;
        match self.store.write_batch(&batch, &expectations) {
            Ok(()) => {
                for member in &batch {
                    self.indices.note(member);
                }
                events.push(WhatHappened::Succeeded {
                    id: target.id.clone(),
                });
                if !children.is_empty() {
                    events.push(WhatHappened::TriggersFired {
                        id: target.id.clone(),
                        children: children.clone(),
                    });
                    for child in children {
                        events.push(WhatHappened::Activated {
                            id: child,
                            by: ActivatedBy::Parent {
                                id: target.id.clone(),
                            },
                        });
                    }
                }
                Ok(())
            }
            Err(StoreError::CasMismatch { id, expected, actual }) => {
                self.skip_invariant(
                    &id,
                    &format!("cas mismatch (expected {}, actual {})", expected, actual),
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Terminal failure: the target write and its `fallbacks`
    /// activations land in one atomic batch.
    fn fail(
        &mut self,
        mut target: Target,
        state: State,
        expected: usize,
        events: &mut Vec<WhatHappened>,
    ) -> Result<(), EngineError> {
        let now = self.now_ms();
        if let Err(e) = target.push_state(state, now) {
            self.skip_invariant(&target.id, &e.to_string());
            return Ok(());
        }
        let (batch, expectations, children) =
            self.collect_activations(&target, expected, &target.fallbacks.clone())?;
        match self.store.write_batch(&batch, &expectations) {
            Ok(()) => {
                for member in &batch {
                    self.indices.note(member);
                }
                if !children.is_empty() {
                    events.push(WhatHappened::FallbacksFired {
                        id: target.id.clone(),
                        children: children.clone(),
                    });
                    for child in children {
                        events.push(WhatHappened::Activated {
                            id: child,
                            by: ActivatedBy::Parent {
                                id: target.id.clone(),
                            },
                        });
                    }
                }
                Ok(())
            }
            Err(StoreError::CasMismatch { id, expected, actual }) => {
                self.skip_invariant(
                    &id,
                    &format!("cas mismatch (expected {}, actual {})", expected, actual),
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Assemble the batch for a terminal write: the target itself plus
    /// Passive children to activate.
    #[allow(clippy::type_complexity)]
    fn collect_activations(
        &mut self,
        target: &Target,
        expected: usize,
        child_ids: &[TargetId],
    ) -> Result<(Vec<Target>, Vec<usize>, Vec<TargetId>), EngineError> {
        let now = self.now_ms();
        let mut batch = vec![target.clone()];
        let mut expectations = vec![expected];
        let mut activated = Vec::new();
        for child_id in child_ids {
            let Some(mut child) = self.store.get(child_id)? else {
                warn!(parent = %target.id, child = %child_id, "trigger names a missing target");
                continue;
            };
            if !matches!(child.state(), State::Passive) {
                continue;
            }
            let child_expected = child.history.len();
            if child
                .push_state(
                    State::Active {
                        by: ActivatedBy::Parent {
                            id: target.id.clone(),
                        },
                    },
                    now,
                )
                .is_err()
            {
                continue;
            }
            batch.push(child);
            expectations.push(child_expected);
            activated.push(child_id.clone());
        }
        Ok((batch, expectations, activated))
    }

    fn fail_starting(
        &mut self,
        target: Target,
        reason: String,
        events: &mut Vec<WhatHappened>,
    ) -> Result<(), EngineError> {
        let expected = target.history.len();
        events.push(WhatHappened::StartFailed {
            id: target.id.clone(),
            reason: reason.clone(),
        });
        self.fail(target, State::FailedFromStarting { reason }, expected, events)
    }
}

async fn run_condition(
    condition: &Condition,
    host: &Host,
    deadline: Duration,
) -> Result<bool, ConditionError> {
    match tokio::time::timeout(deadline, condition::evaluate(condition, host)).await {
        Ok(result) => result,
        Err(_) => Err(ConditionError::Recoverable(format!(
            "condition check timed out after {:?}",
            deadline
        ))),
    }
}

fn rp_present(rp: Option<RunParameters>) -> RunParameters {
    rp.unwrap_or_else(|| RunParameters::new(0, serde_json::Value::Null))
}

/// Backend presence is checked in `build_dispatch`; this keeps the
/// worker closure free of unwraps.
trait ExpectPresent {
    fn expect_present(self) -> Arc<dyn Backend>;
}

impl ExpectPresent for Option<Arc<dyn Backend>> {
    fn expect_present(self) -> Arc<dyn Backend> {
        match self {
            Some(backend) => backend,
            None => unreachable!("dispatch built without backend"),
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
