//! AllRunnerRoot: the cluster-wide variant.
//!
//! Runs jobs only while holding the current actor Tag; watches a watchdog
//! for starvation; reclaims ghost ownership from nodes that have gone dark.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::actor::{Actor, ActorEvent};
use crate::clock::now_secs;
use crate::codereg::CodeRegistry;
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::errsink::ErrorSink;
use crate::kv::KvClient;
use crate::root::{RootState, RunnerRoot};

/// The cluster-wide runner root.
pub struct AllRunnerRoot {
    state: RootState,
    actor: Arc<dyn Actor>,
    /// Set on every Tag, read-and-cleared by the watchdog. Stands in for the
    /// spec's bounded `_age_q` (capacity 10): since the watchdog only cares
    /// whether *any* tick arrived since its last deadline, a flag coalesces
    /// the same way a best-effort bounded queue would under backpressure.
    age_ticked: AtomicBool,
    /// This node's own reported load (0-100, higher is freer). Actual load
    /// measurement is an operator concern outside this crate's scope;
    /// defaults to fully free and is updated via `set_local_load`.
    local_load: AtomicU8,
}

impl AllRunnerRoot {
    /// Build a new all-nodes root.
    pub fn new(
        config: RunnerConfig,
        kv_name: impl Into<String>,
        kv: Arc<dyn KvClient>,
        registry: Arc<dyn CodeRegistry>,
        errsink: Arc<dyn ErrorSink>,
        actor: Arc<dyn Actor>,
    ) -> Self {
        Self {
            state: RootState::new(config, kv_name, kv, registry, errsink),
            actor,
            age_ticked: AtomicBool::new(false),
            local_load: AtomicU8::new(100),
        }
    }

    /// Update the load value reported to the actor on the next heartbeat.
    pub fn set_local_load(&self, value: u8) {
        self.local_load.store(value, Ordering::SeqCst);
    }

    /// Drain the actor's event stream, reacting to Ping/Tag/Untag. Runs
    /// until the stream ends, which is fatal (`RunnerError::ActorLoss`) —
    /// the caller is expected to tear the root down on return.
    pub async fn run_actor_loop(self: Arc<Self>) -> RunnerError {
        loop {
            match self.actor.recv().await {
                Some(ActorEvent::Ping { node, value }) => {
                    let now = now_secs();
                    let handle = self.state.node_registry.get_or_insert(&node, now);
                    handle.touch(now, value);
                    self.state.node_history.touch(&node);
                    self.actor.set_value(self.local_load.load(Ordering::SeqCst));
                }
                Some(ActorEvent::Tag) => {
                    tracing::info!(root = self.name(), "became leader");
                    self.actor.set_value(self.local_load.load(Ordering::SeqCst));
                    self.state.node_history.touch(self.name());
                    self.age_ticked.store(true, Ordering::SeqCst);

                    let start_evt = Arc::new(Notify::new());
                    let waiter = start_evt.notified();
                    tokio::pin!(waiter);
                    let root = self.clone();
                    let evt = start_evt.clone();
                    tokio::spawn(async move { RunnerRoot::run_now(root, evt).await });
                    waiter.as_mut().await;
                }
                Some(ActorEvent::Untag) => {
                    tracing::info!(root = self.name(), "leadership lost");
                    self.state.cancel_rescan().await;
                    if self.state.config.cancel_on_untag {
                        self.cancel_all_running("Cancel: Leadership lost").await;
                    }
                }
                Some(ActorEvent::AuthPing { .. }) => {
                    // Not consumed by the cluster-wide variant.
                }
                None => {
                    tracing::error!(root = self.name(), "actor stream ended");
                    return RunnerError::ActorLoss;
                }
            }
        }
    }

    /// Cancel every entry currently owned and running on this node.
    async fn cancel_all_running(&self, comment: &str) {
        for entry in self.state.entries.iter() {
            entry.value().cancel_running(comment).await;
        }
    }

    /// Reclaim ownership from nodes whose `seen` has exceeded `max_age`:
    /// null their `node` field on every entry they owned, making those
    /// entries eligible for re-election on the next rescan.
    pub async fn cleanup_nodes(&self) {
        let max_age = self.state.config.max_age;
        for stale_node in self.state.node_history.stale(max_age) {
            tracing::warn!(node = %stale_node, "node gone dark, reclaiming ownership");
            for entry in self.state.entries.iter() {
                let attrs = entry.value().snapshot().await;
                if attrs.node.as_deref() == Some(stale_node.as_str()) {
                    entry.value().seems_down().await;
                }
            }
            self.state.node_history.remove(&stale_node);
        }
    }

    /// Periodically sweep for ghost ownership. Runs forever; spawn as its
    /// own task alongside the actor loop and watchdog.
    pub async fn run_cleanup_loop(self: Arc<Self>) {
        let period = self.state.config.max_age;
        loop {
            tokio::time::sleep(period).await;
            self.cleanup_nodes().await;
        }
    }

    /// The starvation watchdog: if no Tag arrives within `max_age`, raise
    /// `RunnerError::Starvation`. The caller should treat this as fatal and
    /// tear the root down — the node is likely partitioned.
    pub async fn run_age_killer(self: Arc<Self>) -> RunnerError {
        loop {
            tokio::time::sleep(self.state.config.max_age).await;
            if !self.age_ticked.swap(false, Ordering::SeqCst) {
                tracing::error!(root = self.name(), "no leader tag observed within max_age");
                return RunnerError::Starvation;
            }
        }
    }
}

#[async_trait::async_trait]
impl RunnerRoot for AllRunnerRoot {
    fn state(&self) -> &RootState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::testing::FakeActor;
    use crate::codereg::testing::InMemoryRegistry;
    use crate::errsink::testing::InMemorySink;
    use crate::kv::testing::InMemoryKv;
    use crate::kv::JobAttributes;
    use std::sync::atomic::Ordering as StdOrdering;
    use std::time::Duration;

    fn make_root(actor: Arc<dyn Actor>) -> Arc<AllRunnerRoot> {
        let kv: Arc<dyn KvClient> = Arc::new(InMemoryKv::new());
        let registry: Arc<dyn CodeRegistry> = Arc::new(InMemoryRegistry::new());
        let errsink: Arc<dyn ErrorSink> = Arc::new(InMemorySink::new());
        let config = RunnerConfig::new("/run").with_max_age(Duration::from_millis(100));
        Arc::new(AllRunnerRoot::new(config, "node-a", kv, registry, errsink, actor))
    }

    #[tokio::test]
    async fn ping_event_updates_node_history_and_registry() {
        let (actor, handle) = FakeActor::new();
        let root = make_root(Arc::new(actor));

        let root_clone = root.clone();
        let task = tokio::spawn(async move { root_clone.run_actor_loop().await });

        handle.push(ActorEvent::Ping {
            node: "node-b".into(),
            value: 42,
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(root.state().node_history.len(), 1);
        let peer = root.state().node_registry.get_or_insert("node-b", 0);
        assert_eq!(peer.load(), 42);

        task.abort();
    }

    #[tokio::test]
    async fn tag_event_spawns_rescan_and_ticks_watchdog() {
        let (actor, handle) = FakeActor::new();
        let root = make_root(Arc::new(actor));

        let root_clone = root.clone();
        let task = tokio::spawn(async move { root_clone.run_actor_loop().await });

        handle.push(ActorEvent::Tag);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(root.age_ticked.load(StdOrdering::SeqCst));
        root.state().cancel_rescan().await;
        task.abort();
    }

    #[tokio::test]
    async fn actor_stream_end_returns_actor_loss() {
        let (actor, handle) = FakeActor::new();
        let root = make_root(Arc::new(actor));
        drop(handle);

        let err = root.run_actor_loop().await;
        assert!(matches!(err, RunnerError::ActorLoss));
    }

    #[tokio::test]
    async fn watchdog_raises_starvation_without_a_tick() {
        let (actor, _handle) = FakeActor::new();
        let root = make_root(Arc::new(actor));

        let err = root.run_age_killer().await;
        assert!(matches!(err, RunnerError::Starvation));
    }

    #[tokio::test]
    async fn watchdog_survives_when_ticked() {
        let (actor, _handle) = FakeActor::new();
        let root = make_root(Arc::new(actor));
        root.age_ticked.store(true, StdOrdering::SeqCst);

        let root_clone = root.clone();
        let task = tokio::spawn(async move { root_clone.run_age_killer().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test]
    async fn cleanup_nodes_clears_ghost_ownership() {
        let root = make_root(Arc::new(FakeActor::new().0));
        root.state().node_history.touch("node-b");

        let entry = Arc::new(crate::entry::JobEntry::new(
            "/run/foo",
            "node-a",
            JobAttributes {
                code: Some("a.b".into()),
                node: Some("node-b".into()),
                ..Default::default()
            },
            root.state().kv.clone(),
            root.state().registry.clone(),
            root.state().errsink.clone(),
            10,
        ));
        root.state().entries.insert("/run/foo".into(), entry.clone());

        tokio::time::sleep(Duration::from_millis(150)).await;
        root.cleanup_nodes().await;

        let snapshot = entry.snapshot().await;
        assert!(snapshot.node.is_none());
        assert_eq!(root.state().node_history.len(), 0);
    }
}
