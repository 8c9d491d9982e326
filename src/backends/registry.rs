//! Backend registry keyed by identifier.
//!
//! Backends are stored under caller-chosen ids (`"openai"`, `"local-llama"`)
//! in registration order. The dispatcher resolves ids through the registry
//! on every call, so backends registered or removed at runtime take effect
//! for the next request.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::traits::Backend;
use crate::types::Operation;

#[derive(Default)]
struct Entries {
    by_id: HashMap<String, Arc<dyn Backend>>,
    order: Vec<String>,
}

/// Registry of backends by id.
#[derive(Default)]
pub struct BackendRegistry {
    entries: RwLock<Entries>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under `id`, replacing any previous one.
    ///
    /// A replaced backend keeps its original position in the order.
    pub fn register(&self, id: impl Into<String>, backend: Arc<dyn Backend>) {
        let id = id.into();
        let mut entries = self.entries.write();
        if entries.by_id.insert(id.clone(), backend).is_none() {
            entries.order.push(id);
        }
    }

    /// Remove a backend. Returns it if it was registered.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Backend>> {
        let mut entries = self.entries.write();
        let removed = entries.by_id.remove(id);
        if removed.is_some() {
            entries.order.retain(|existing| existing != id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Backend>> {
        self.entries.read().by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().by_id.contains_key(id)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.entries.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any available backend can serve `operation`.
    pub fn supports(&self, operation: Operation) -> bool {
        self.entries
            .read()
            .by_id
            .values()
            .any(|backend| backend.is_available() && backend.capabilities().supports(operation))
    }

    /// Ids of available backends that can serve `operation`, in order.
    pub fn capable_of(&self, operation: Operation) -> Vec<String> {
        let entries = self.entries.read();
        entries
            .order
            .iter()
            .filter(|id| {
                entries.by_id.get(*id).is_some_and(|backend| {
                    backend.is_available() && backend.capabilities().supports(operation)
                })
            })
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.ids())
            .finish()
    }
}
