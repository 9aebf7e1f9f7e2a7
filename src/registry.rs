//! NodeRegistry: interned per-node metadata used by ownership decisions.
//!
//! Every lookup for a given name returns the same `Arc<NodeHandle>`, so
//! `seen`/`load` updates from one event handler are visible to every other
//! holder of the handle. Interning is lock-free on the read path via
//! `dashmap`.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Shared, interned metadata for one node.
pub struct NodeHandle {
    name: String,
    seen: AtomicI64,
    load: AtomicU8,
}

impl NodeHandle {
    fn new(name: String, now: i64) -> Self {
        Self {
            name,
            seen: AtomicI64::new(now),
            load: AtomicU8::new(0),
        }
    }

    /// The node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Epoch seconds of the last ping received from this node.
    pub fn seen(&self) -> i64 {
        self.seen.load(Ordering::SeqCst)
    }

    /// Last reported free-capacity value, 0-100 (higher is freer).
    pub fn load(&self) -> u8 {
        self.load.load(Ordering::SeqCst)
    }

    /// Record a fresh sighting: updates `seen` to `now` and `load`.
    pub fn touch(&self, now: i64, load: u8) {
        self.seen.store(now, Ordering::SeqCst);
        self.load.store(load, Ordering::SeqCst);
    }
}

/// Interned map of node name to shared handle.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: DashMap<String, Arc<NodeHandle>>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `name`, creating it (with `seen = now`) if this
    /// is the first time it has been observed. Idempotent and lock-free on
    /// the common (already-present) path.
    pub fn get_or_insert(&self, name: &str, now: i64) -> Arc<NodeHandle> {
        if let Some(existing) = self.nodes.get(name) {
            return existing.clone();
        }
        self.nodes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(NodeHandle::new(name.to_string(), now)))
            .clone()
    }

    /// Every node handle currently interned.
    pub fn all(&self) -> Vec<Arc<NodeHandle>> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }
}
