// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compiled-in backend registry.
//!
//! No runtime plugin loading: plugins are registered by name at
//! construction and looked up when targets name them.

use crate::{Backend, LsfBackend, PbsBackend, ProcessBackend, YarnBackend};
use indexmap::IndexMap;
use std::sync::Arc;

/// Name-indexed set of backend plugins.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: IndexMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in plugin.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ProcessBackend::new()));
        registry.register(Arc::new(PbsBackend::new()));
        registry.register(Arc::new(LsfBackend::new()));
        registry.register(Arc::new(YarnBackend::new()));
        registry
    }

    /// Register a plugin under its own name; replaces any previous
    /// plugin of that name.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
