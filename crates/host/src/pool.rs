// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-host session limiting.
//!
//! Each distinct host gets its own semaphore so a slow cluster cannot
//! starve the others; the engine additionally applies a global cap.

use gantry_core::HostSpec;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default maximum concurrent sessions per host.
pub const DEFAULT_MAX_SESSIONS: usize = 8;

/// Pools host session permits, one semaphore per host.
pub struct HostPool {
    max_sessions: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostPool {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a session permit for the given host, waiting if the host
    /// is at its concurrency cap. The permit releases on drop.
    pub async fn acquire(&self, spec: &HostSpec) -> OwnedSemaphorePermit {
        let semaphore = {
            let mut map = self.semaphores.lock();
            Arc::clone(
                map.entry(spec.pool_key())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.max_sessions))),
            )
        };
        // The semaphore is never closed, so acquire only fails if we
        // closed it ourselves.
        match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_closed) => unreachable!("host semaphore is never closed"),
        }
    }

    /// Acquire without waiting; `None` when the host is at capacity.
    /// Used by the engine's backpressure path, where excess work stays
    /// pending for the next tick instead of queueing.
    pub fn try_acquire(&self, spec: &HostSpec) -> Option<OwnedSemaphorePermit> {
        let semaphore = {
            let mut map = self.semaphores.lock();
            Arc::clone(
                map.entry(spec.pool_key())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.max_sessions))),
            )
        };
        semaphore.try_acquire_owned().ok()
    }

    /// Permits currently available for a host (for tests and health).
    pub fn available(&self, spec: &HostSpec) -> usize {
        let map = self.semaphores.lock();
        map.get(&spec.pool_key())
            .map(|s| s.available_permits())
            .unwrap_or(self.max_sessions)
    }
}

impl Default for HostPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
