//! The code registry boundary.
//!
//! Resolves a job's `code` identifier to a callable plus its `is_async`
//! flag: async callables get a connectivity queue injected and are
//! awaited; synchronous callables run to completion
//! directly. Like [`crate::kv::KvClient`] and [`crate::actor::Actor`], the
//! registry itself is an opaque external collaborator — this module only
//! owns the trait shape callers implement against.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::connectivity::ConnectivityState;
use crate::kv::KvClient;

/// Sentinel-or-update delivered through a job's connectivity queue. `None`
/// is the overflow sentinel from `JobEntry::send_event`'s overflow policy:
/// once sent, the job is no longer being kept current.
pub type ConnectivityQueueItem = Option<ConnectivityState>;

/// The three well-known keys injected into every invocation, plus the
/// user's own `data`.
pub struct CallContext {
    /// Full KV path of the entry being run, injected as `_entry`.
    pub entry: String,
    /// Name of the node executing this job (`self.root.name`).
    pub node: String,
    /// Shared KV client, injected as `_client`.
    pub client: Arc<dyn KvClient>,
    /// Connectivity queue, injected as `_info`, present only for async code.
    pub info: Option<mpsc::Receiver<ConnectivityQueueItem>>,
}

/// A resolved, callable job implementation.
#[async_trait::async_trait]
pub trait JobCallable: Send + Sync {
    /// Invoke the job with its (deep-copied) `data` and the injected
    /// context. Returns the value to store as the entry's `result`.
    async fn call(&self, data: Map<String, Value>, ctx: CallContext) -> anyhow::Result<Value>;
}

/// A resolved code entry: the callable plus whether it is asynchronous.
pub struct CodeHandle {
    /// Whether this code awaits (gets a connectivity queue, is cooperatively
    /// cancellable at its own suspension points) or runs to completion
    /// synchronously from the runner's perspective.
    pub is_async: bool,
    /// The callable itself.
    pub callable: Arc<dyn JobCallable>,
}

/// Resolves code identifiers to callables.
#[async_trait::async_trait]
pub trait CodeRegistry: Send + Sync + 'static {
    /// Resolve `path` to a callable, or `None` if unknown
    /// (`RunnerError::CodeResolution`).
    async fn resolve(&self, path: &str) -> Option<CodeHandle>;
}

/// In-memory [`CodeRegistry`] for tests: a name-to-callable map populated by
/// the test itself.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use dashmap::DashMap;

    /// A registry backed by a map the test populates directly.
    #[derive(Default)]
    pub struct InMemoryRegistry {
        entries: DashMap<String, CodeHandle>,
    }

    impl InMemoryRegistry {
        /// Create an empty registry.
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a synchronous or asynchronous callable under `path`.
        pub fn register(&self, path: impl Into<String>, is_async: bool, callable: Arc<dyn JobCallable>) {
            self.entries
                .insert(path.into(), CodeHandle { is_async, callable });
        }
    }

    #[async_trait::async_trait]
    impl CodeRegistry for InMemoryRegistry {
        async fn resolve(&self, path: &str) -> Option<CodeHandle> {
            self.entries.get(path).map(|e| CodeHandle {
                is_async: e.is_async,
                callable: e.callable.clone(),
            })
        }
    }

    /// A callable built from a plain async closure, for quick test fixtures.
    pub struct FnCallable<F>(pub F);

    #[async_trait::async_trait]
    impl<F, Fut> JobCallable for FnCallable<F>
    where
        F: Fn(Map<String, Value>, CallContext) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send,
    {
        async fn call(&self, data: Map<String, Value>, ctx: CallContext) -> anyhow::Result<Value> {
            (self.0)(data, ctx).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FnCallable, InMemoryRegistry};
    use super::*;
    use crate::kv::testing::InMemoryKv;

    #[tokio::test]
    async fn resolve_unknown_path_returns_none() {
        let registry = InMemoryRegistry::new();
        assert!(registry.resolve("no.such.code").await.is_none());
    }

    #[tokio::test]
    async fn resolve_registered_path_preserves_is_async() {
        let registry = InMemoryRegistry::new();
        registry.register(
            "forty.two",
            false,
            Arc::new(FnCallable(|_data, _ctx| async { Ok(Value::from(42)) })),
        );

        let handle = registry.resolve("forty.two").await.unwrap();
        assert!(!handle.is_async);

        let kv: Arc<dyn KvClient> = Arc::new(InMemoryKv::new());
        let ctx = CallContext {
            entry: "/run/forty.two".into(),
            node: "node-a".into(),
            client: kv,
            info: None,
        };
        let result = handle.callable.call(Map::new(), ctx).await.unwrap();
        assert_eq!(result, Value::from(42));
    }
}
