//! The key-value store boundary.
//!
//! This crate owns the interface only and leaves policy (replication,
//! durability, CRDT merge semantics) to the store implementation.
//! [`KvClient`] is deliberately narrow: persist an entry, read it back, and
//! (via [`KvUpdate`] delivered over a channel set up by the caller) observe
//! replicated changes. Everything else — transport, serialization format,
//! conflict resolution — is an opaque external collaborator.

use serde::{Deserialize, Serialize};
use serde_json::Map;

/// Persisted attributes of one JobEntry, per the KV entry schema.
///
/// Unknown keys are ignored by callers that deserialize this; missing keys
/// take the defaults documented on each field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttributes {
    /// Identifier resolved against the code registry. `None` means inert.
    #[serde(default)]
    pub code: Option<String>,

    /// User parameters, deep-copied into each invocation.
    #[serde(default)]
    pub data: Map<String, serde_json::Value>,

    /// Earliest start time requested by the user, epoch seconds.
    #[serde(default)]
    pub target: i64,

    /// Restart interval after a successful run, seconds. `0` means no repeat.
    #[serde(default)]
    pub repeat: u64,

    /// Base back-off after failure, seconds.
    #[serde(default = "default_delay")]
    pub delay: u64,

    /// Consecutive failure count.
    #[serde(default)]
    pub backoff: u32,

    /// Last invocation start, epoch seconds.
    #[serde(default)]
    pub started: i64,

    /// Last invocation end, epoch seconds.
    #[serde(default)]
    pub stopped: i64,

    /// Last successful return value.
    #[serde(default)]
    pub result: Option<serde_json::Value>,

    /// Node currently executing, `None` if idle.
    #[serde(default)]
    pub node: Option<String>,
}

fn default_delay() -> u64 {
    1
}

impl Default for JobAttributes {
    fn default() -> Self {
        Self {
            code: None,
            data: Map::new(),
            target: 0,
            repeat: 0,
            delay: default_delay(),
            backoff: 0,
            started: 0,
            stopped: 0,
            result: None,
            node: None,
        }
    }
}

/// One replicated change to a JobEntry, as observed by a subscription.
#[derive(Debug, Clone)]
pub struct KvUpdate {
    /// Full path of the entry that changed.
    pub path: String,
    /// The new attribute bundle.
    pub attrs: JobAttributes,
}

/// Persists and reads JobEntry attribute bundles.
///
/// Implementations are responsible for replication, durability, and
/// ordering guarantees (per-entry total order is required; this crate
/// relies on it but does not itself provide it).
#[async_trait::async_trait]
pub trait KvClient: Send + Sync + 'static {
    /// Persist attributes at `path`, overwriting any prior value.
    async fn persist(&self, path: &str, attrs: &JobAttributes) -> anyhow::Result<()>;

    /// Read the current attributes at `path`, if any.
    async fn read(&self, path: &str) -> anyhow::Result<Option<JobAttributes>>;
}

/// In-memory [`KvClient`] for tests, backed by a `DashMap` plus a broadcast
/// channel of [`KvUpdate`]s so a root's subscription loop can be driven the
/// same way a real replicated store would drive it.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use dashmap::DashMap;
    use tokio::sync::broadcast;

    /// A fake KV store: an in-memory map plus a broadcast of updates.
    pub struct InMemoryKv {
        data: DashMap<String, JobAttributes>,
        updates: broadcast::Sender<KvUpdate>,
    }

    impl InMemoryKv {
        /// Create a new, empty store.
        pub fn new() -> Self {
            let (updates, _) = broadcast::channel(256);
            Self {
                data: DashMap::new(),
                updates,
            }
        }

        /// Subscribe to replicated updates, as a real KV client's own
        /// subscription API would return.
        pub fn subscribe(&self) -> broadcast::Receiver<KvUpdate> {
            self.updates.subscribe()
        }

        /// Directly set an entry's attributes and broadcast the change, as
        /// if a remote peer had just written this value. Used by tests to
        /// simulate external mutation (code change, ownership handover).
        pub fn set_external(&self, path: &str, attrs: JobAttributes) {
            self.data.insert(path.to_string(), attrs.clone());
            let _ = self.updates.send(KvUpdate {
                path: path.to_string(),
                attrs,
            });
        }
    }

    impl Default for InMemoryKv {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait::async_trait]
    impl KvClient for InMemoryKv {
        async fn persist(&self, path: &str, attrs: &JobAttributes) -> anyhow::Result<()> {
            self.data.insert(path.to_string(), attrs.clone());
            let _ = self.updates.send(KvUpdate {
                path: path.to_string(),
                attrs: attrs.clone(),
            });
            Ok(())
        }

        async fn read(&self, path: &str) -> anyhow::Result<Option<JobAttributes>> {
            Ok(self.data.get(path).map(|r| r.clone()))
        }
    }
}
