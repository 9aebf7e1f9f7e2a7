//! RunnerRoot: shared scaffolding for both runner variants.
//!
//! Rust has no inheritance, so the "abstract root" from the design is
//! composition plus a trait: [`RootState`] holds the fields every root
//! needs (trigger event, entry map, node bookkeeping, injected
//! collaborators), and [`RunnerRoot`] is a trait with one required accessor
//! (`state`) and a provided default method, `run_now`, implementing the
//! rescan pump. `AllRunnerRoot` and `SingleRunnerRoot` each embed a
//! `RootState` and implement the trait over it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::clock::now_secs;
use crate::codereg::CodeRegistry;
use crate::config::RunnerConfig;
use crate::connectivity::ConnectivityState;
use crate::entry::{JobEntry, ShouldStart};
use crate::errsink::ErrorSink;
use crate::history::NodeHistory;
use crate::kv::KvClient;
use crate::registry::NodeRegistry;

/// Default bound on the in-memory `node_history` LRU. Generous relative to
/// any realistic cluster size; the point is boundedness, not tight sizing.
const NODE_HISTORY_CAPACITY: usize = 256;

/// Fields shared by both runner variants.
pub struct RootState {
    /// This node's own identity.
    pub name: String,
    pub config: RunnerConfig,
    pub kv: Arc<dyn KvClient>,
    pub registry: Arc<dyn CodeRegistry>,
    pub errsink: Arc<dyn ErrorSink>,
    /// JobEntries this root is responsible for scheduling, keyed by full path.
    pub entries: DashMap<String, Arc<JobEntry>>,
    pub node_history: NodeHistory,
    pub node_registry: NodeRegistry,
    trigger: Notify,
    rescan_cancel: Mutex<Option<CancellationToken>>,
    /// Spawned job tasks, owned by the root rather than by any one rescan
    /// loop generation. Jobs must keep running across `cancel_rescan()` and
    /// across leadership handover (UntagEvent stops *starting* new work, not
    /// in-flight work), so this must never live inside `run_now`'s own stack
    /// frame — a `JoinSet` dropped there would abort every job in it.
    job_tasks: Mutex<JoinSet<()>>,
}

impl RootState {
    /// Build a new root state. `name` defaults to the config's `name` field,
    /// falling back to `kv_name` (the KV client's own identity) when unset.
    pub fn new(
        config: RunnerConfig,
        kv_name: impl Into<String>,
        kv: Arc<dyn KvClient>,
        registry: Arc<dyn CodeRegistry>,
        errsink: Arc<dyn ErrorSink>,
    ) -> Self {
        let name = config.name.clone().unwrap_or_else(|| kv_name.into());
        Self {
            name,
            config,
            kv,
            registry,
            errsink,
            entries: DashMap::new(),
            node_history: NodeHistory::new(NODE_HISTORY_CAPACITY),
            node_registry: NodeRegistry::new(),
            trigger: Notify::new(),
            rescan_cancel: Mutex::new(None),
            job_tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// The actor group identifier, `"run"` joined with the configured
    /// suffix.
    pub fn group(&self) -> String {
        self.config.group()
    }

    /// Cancel the currently running rescan loop, if any. A no-op if none is
    /// running (e.g. called twice, or before the first Tag).
    pub async fn cancel_rescan(&self) {
        if let Some(cancel) = self.rescan_cancel.lock().await.take() {
            cancel.cancel();
        }
    }
}

/// Shared behavior of a runner root: the rescan pump, trigger signaling, and
/// the hooks each variant customizes (which entries it schedules, what
/// connectivity state new async jobs start with).
#[async_trait::async_trait]
pub trait RunnerRoot: Send + Sync + 'static {
    /// Access to the shared fields.
    fn state(&self) -> &RootState;

    /// This node's identity.
    fn name(&self) -> &str {
        &self.state().name
    }

    /// Entries this variant is currently responsible for scheduling. The
    /// all-nodes variant schedules every entry under its path; the
    /// per-node variant schedules only the subtree under its own name.
    fn schedulable_entries(&self) -> Vec<Arc<JobEntry>> {
        self.state()
            .entries
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    /// The connectivity state pushed as the first `_info` value for a
    /// newly-started async job. `SingleRunnerRoot` overrides this with its
    /// currently-computed state; the cluster-wide variant has no such
    /// concept and leaves it `None`.
    fn initial_connectivity(&self) -> Option<ConnectivityState> {
        None
    }

    /// Wake the rescan loop. `Notify::notify_one` already coalesces
    /// concurrent calls into a single wakeup, matching the "coalescing
    /// concurrent triggers" requirement directly.
    fn trigger_rescan(&self) {
        self.state().trigger.notify_one();
    }

    /// The rescan pump. Signals `start_evt` once installed, then loops:
    /// install a fresh trigger, walk schedulable entries, spawn due ones
    /// (paced by `start_delay`), and wait for either the next trigger or the
    /// smallest pending delay.
    ///
    /// Spawned job tasks go into `state().job_tasks`, not a set local to this
    /// call: cancelling this loop (leadership lost, or shutdown of this
    /// generation) must only stop *starting* new work, never abort jobs
    /// already in flight.
    async fn run_now(self: Arc<Self>, start_evt: Arc<Notify>) {
        let cancel = CancellationToken::new();
        *self.state().rescan_cancel.lock().await = Some(cancel.clone());
        start_evt.notify_one();

        loop {
            let notified = self.state().trigger.notified();
            tokio::pin!(notified);

            let now = now_secs();
            let mut min_delay: Option<Duration> = None;

            for entry in self.schedulable_entries() {
                match entry.should_start(now).await {
                    ShouldStart::StartNow => {
                        let init = self.initial_connectivity();
                        let e = entry.clone();
                        self.state().job_tasks.lock().await.spawn(async move { e.run(init).await });
                        tokio::time::sleep(self.state().config.start_delay).await;
                    }
                    ShouldStart::Due(secs) => {
                        let d = Duration::from_secs(secs.max(0) as u64);
                        min_delay = Some(match min_delay {
                            Some(cur) if cur <= d => cur,
                            _ => d,
                        });
                    }
                    ShouldStart::DoNotStart => {}
                }
            }

            {
                let mut tasks = self.state().job_tasks.lock().await;
                while tasks.try_join_next().is_some() {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(root = self.name(), "rescan loop cancelled, in-flight jobs continue");
                    break;
                }
                _ = &mut notified => {}
                _ = sleep_or_pending(min_delay) => {}
            }
        }
    }
}

async fn sleep_or_pending(delay: Option<Duration>) {
    match delay {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codereg::testing::{FnCallable, InMemoryRegistry};
    use crate::errsink::testing::InMemorySink;
    use crate::kv::testing::InMemoryKv;
    use crate::kv::JobAttributes;
    use serde_json::Value;
    use std::time::Duration as StdDuration;

    struct TestRoot {
        state: RootState,
    }

    #[async_trait::async_trait]
    impl RunnerRoot for TestRoot {
        fn state(&self) -> &RootState {
            &self.state
        }
    }

    #[tokio::test]
    async fn run_now_starts_due_entries_and_signals_start_evt() {
        let kv: Arc<dyn KvClient> = Arc::new(InMemoryKv::new());
        let registry = InMemoryRegistry::new();
        registry.register(
            "forty.two",
            false,
            Arc::new(FnCallable(|_d, _c| async { Ok(Value::from(42)) })),
        );
        let registry: Arc<dyn CodeRegistry> = Arc::new(registry);
        let errsink: Arc<dyn ErrorSink> = Arc::new(InMemorySink::new());

        let config = RunnerConfig::new("/run").with_start_delay(StdDuration::from_millis(1));
        let state = RootState::new(config, "node-a", kv.clone(), registry.clone(), errsink.clone());

        let entry = Arc::new(JobEntry::new(
            "/run/foo",
            "node-a",
            JobAttributes {
                code: Some("forty.two".into()),
                target: 1,
                ..Default::default()
            },
            kv.clone(),
            registry,
            errsink,
            10,
        ));
        state.entries.insert("/run/foo".into(), entry.clone());

        let root = Arc::new(TestRoot { state });
        let start_evt = Arc::new(Notify::new());
        let waiter = start_evt.notified();
        tokio::pin!(waiter);

        let root_clone = root.clone();
        let start_evt_clone = start_evt.clone();
        let handle = tokio::spawn(async move { root_clone.run_now(start_evt_clone).await });

        waiter.as_mut().await;

        // give the loop a chance to spawn and run the job
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        root.state().cancel_rescan().await;
        let _ = tokio::time::timeout(StdDuration::from_secs(1), handle).await;

        let stored = kv.read("/run/foo").await.unwrap().unwrap();
        assert_eq!(stored.result, Some(Value::from(42)));
    }

    #[tokio::test]
    async fn trigger_rescan_wakes_the_loop_promptly() {
        let kv: Arc<dyn KvClient> = Arc::new(InMemoryKv::new());
        let registry: Arc<dyn CodeRegistry> = Arc::new(InMemoryRegistry::new());
        let errsink: Arc<dyn ErrorSink> = Arc::new(InMemorySink::new());

        let config = RunnerConfig::new("/run").with_start_delay(StdDuration::from_millis(1));
        let state = RootState::new(config, "node-a", kv, registry, errsink);
        let root = Arc::new(TestRoot { state });

        let start_evt = Arc::new(Notify::new());
        let waiter = start_evt.notified();
        tokio::pin!(waiter);

        let root_clone = root.clone();
        let start_evt_clone = start_evt.clone();
        let handle = tokio::spawn(async move { root_clone.run_now(start_evt_clone).await });
        waiter.as_mut().await;

        root.trigger_rescan();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        root.state().cancel_rescan().await;
        let _ = tokio::time::timeout(StdDuration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn cancel_rescan_does_not_abort_a_running_job() {
        let kv: Arc<dyn KvClient> = Arc::new(InMemoryKv::new());
        let registry = InMemoryRegistry::new();
        registry.register(
            "slow.ok",
            false,
            Arc::new(FnCallable(|_d, _c| async {
                tokio::time::sleep(StdDuration::from_millis(100)).await;
                Ok(Value::from(7))
            })),
        );
        let registry: Arc<dyn CodeRegistry> = Arc::new(registry);
        let errsink: Arc<dyn ErrorSink> = Arc::new(InMemorySink::new());

        let config = RunnerConfig::new("/run").with_start_delay(StdDuration::from_millis(1));
        let state = RootState::new(config, "node-a", kv.clone(), registry.clone(), errsink.clone());

        let entry = Arc::new(JobEntry::new(
            "/run/slow",
            "node-a",
            JobAttributes {
                code: Some("slow.ok".into()),
                target: 1,
                ..Default::default()
            },
            kv.clone(),
            registry,
            errsink,
            10,
        ));
        state.entries.insert("/run/slow".into(), entry.clone());

        let root = Arc::new(TestRoot { state });
        let start_evt = Arc::new(Notify::new());
        let waiter = start_evt.notified();
        tokio::pin!(waiter);

        let root_clone = root.clone();
        let start_evt_clone = start_evt.clone();
        let handle = tokio::spawn(async move { root_clone.run_now(start_evt_clone).await });
        waiter.as_mut().await;

        // Wait for the job to claim ownership, then cancel the rescan loop
        // while it is still in flight — cancelling the pump must only stop
        // starting new work, not abort the job it already spawned.
        loop {
            if entry.is_running().await {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        root.state().cancel_rescan().await;
        let _ = tokio::time::timeout(StdDuration::from_secs(1), handle).await;

        assert!(entry.is_running().await, "job was aborted along with the rescan loop");

        tokio::time::sleep(StdDuration::from_millis(150)).await;
        let stored = kv.read("/run/slow").await.unwrap().unwrap();
        assert_eq!(stored.result, Some(Value::from(7)));
        assert!(stored.node.is_none());
    }
}
