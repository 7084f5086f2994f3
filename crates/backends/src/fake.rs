// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable fake backend for engine and daemon tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::{Backend, BackendError, QueryError, StartOutcome, Update};
use async_trait::async_trait;
use gantry_core::RunParameters;
use gantry_host::Host;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Canned behaviors, shared so tests keep a handle after registration.
#[derive(Default)]
pub struct FakePlan {
    /// Outcomes returned by successive `start` calls; empty = Started.
    pub start_outcomes: Mutex<VecDeque<StartOutcome>>,
    /// Updates returned by successive `update` calls; empty = Succeeded.
    pub updates: Mutex<VecDeque<Update>>,
    pub start_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub kill_calls: AtomicUsize,
}

/// Backend whose behavior is scripted by a [`FakePlan`].
pub struct FakeBackend {
    plan: Arc<FakePlan>,
}

impl FakeBackend {
    pub fn new() -> (Self, Arc<FakePlan>) {
        let plan = Arc::new(FakePlan::default());
        (
            Self {
                plan: Arc::clone(&plan),
            },
            plan,
        )
    }

    fn running_rp() -> RunParameters {
        RunParameters::new(1, serde_json::json!({ "phase": "running" }))
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn create(&self, config: serde_json::Value) -> Result<RunParameters, BackendError> {
        Ok(RunParameters::new(1, config))
    }

    async fn start(&self, _rp: &RunParameters, _host: &Host) -> StartOutcome {
        self.plan.start_calls.fetch_add(1, Ordering::SeqCst);
        self.plan
            .start_outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| StartOutcome::Started(Self::running_rp()))
    }

    async fn update(&self, rp: &RunParameters, _host: &Host) -> Result<Update, BackendError> {
        self.plan.update_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .plan
            .updates
            .lock()
            .pop_front()
            .unwrap_or_else(|| Update::Succeeded(rp.clone())))
    }

    async fn kill(&self, _rp: &RunParameters, _host: &Host) -> Result<(), BackendError> {
        self.plan.kill_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(
        &self,
        _rp: &RunParameters,
        _host: &Host,
        item: &str,
    ) -> Result<Vec<u8>, QueryError> {
        match item {
            "stdout" => Ok(b"fake stdout".to_vec()),
            other => Err(QueryError::UnknownItem {
                item: other.to_string(),
            }),
        }
    }

    fn additional_queries(&self, _rp: &RunParameters) -> Vec<(String, String)> {
        Vec::new()
    }
}
