//! SingleRunnerRoot: the per-node variant.
//!
//! Schedules only the subtree of JobEntries keyed by this node's own name,
//! and treats the actor purely as a health signal: the presence of
//! `AuthPing`s from the declared `cores` drives a coarse connectivity state
//! that running async jobs observe.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::actor::{Actor, ActorEvent};
use crate::codereg::CodeRegistry;
use crate::config::RunnerConfig;
use crate::connectivity::{self, ConnectivityState};
use crate::entry::JobEntry;
use crate::error::RunnerError;
use crate::errsink::ErrorSink;
use crate::kv::KvClient;
use crate::root::{RootState, RunnerRoot};

/// The per-node runner root.
pub struct SingleRunnerRoot {
    state: RootState,
    actor: Arc<dyn Actor>,
    cores: RwLock<Vec<String>>,
    n_nodes: AtomicUsize,
    connectivity: AtomicU8,
    /// Set on every AuthPing, read-and-cleared by `_age_notifier`.
    auth_ticked: AtomicBool,
}

impl SingleRunnerRoot {
    /// Build a new per-node root. `cores` is the initial quorum membership;
    /// `update_cores` reacts to later KV-driven changes.
    pub fn new(
        config: RunnerConfig,
        kv_name: impl Into<String>,
        kv: Arc<dyn KvClient>,
        registry: Arc<dyn CodeRegistry>,
        errsink: Arc<dyn ErrorSink>,
        actor: Arc<dyn Actor>,
    ) -> Self {
        let cores = config.cores.clone();
        let n_nodes = cores.len();
        Self {
            state: RootState::new(config, kv_name, kv, registry, errsink),
            actor,
            cores: RwLock::new(cores),
            n_nodes: AtomicUsize::new(n_nodes),
            connectivity: AtomicU8::new(ConnectivityState::Detached.to_u8()),
            auth_ticked: AtomicBool::new(false),
        }
    }

    /// Prefix every JobEntry under this node's own subtree is stored at.
    fn subtree_prefix(&self) -> String {
        format!("{}/", self.name())
    }

    /// Register (or replace) the JobEntry for `path`, relative to this
    /// node's own subtree prefix. Mirrors `RootState::entries` population
    /// for the all-nodes variant; kept a thin wrapper so callers don't need
    /// to reach into `state()` directly.
    pub fn insert_entry(&self, relative_path: impl Into<String>, entry: Arc<JobEntry>) {
        let full = format!("{}{}", self.subtree_prefix(), relative_path.into());
        self.state.entries.insert(full, entry);
    }

    /// React to a KV update of the root configuration entry: recompute
    /// quorum participation. If this node is among `cores`, declare
    /// participation in a quorum of `cores.len()`; otherwise withdraw.
    pub async fn update_cores(&self, cores: Vec<String>) {
        let n = cores.len();
        let is_core = cores.iter().any(|c| c == self.name());
        *self.cores.write().await = cores;
        self.n_nodes.store(n, Ordering::SeqCst);

        if is_core {
            self.actor.enable(n);
        } else {
            self.actor.disable(n);
        }
    }

    /// Drain the actor's event stream, consuming only `AuthPing`. Runs until
    /// the stream ends (`ActorLoss`).
    pub async fn run_actor_loop(self: Arc<Self>) -> RunnerError {
        loop {
            match self.actor.recv().await {
                Some(ActorEvent::AuthPing { node }) => {
                    self.state.node_history.touch(&node);
                    self.auth_ticked.store(true, Ordering::SeqCst);
                    self.notify_active().await;
                }
                Some(ActorEvent::Ping { .. })
                | Some(ActorEvent::Tag)
                | Some(ActorEvent::Untag) => {
                    // Only AuthPing carries connectivity signal here.
                }
                None => {
                    tracing::error!(root = self.name(), "actor stream ended");
                    return RunnerError::ActorLoss;
                }
            }
        }
    }

    /// Recompute connectivity from `node_history` and, if it changed, push
    /// the new state into every currently-running job.
    pub async fn notify_active(&self) {
        let n_nodes = self.n_nodes.load(Ordering::SeqCst);
        let new_state = connectivity::derive(&self.state.node_history, self.name(), n_nodes);
        let prior = ConnectivityState::from_u8(self.connectivity.swap(new_state.to_u8(), Ordering::SeqCst));

        if prior != new_state {
            tracing::debug!(root = self.name(), ?new_state, "connectivity changed");
            for entry in self.state.entries.iter() {
                entry.value().send_event(new_state).await;
            }
        }
    }

    /// If no `AuthPing` arrives within `max_age`, re-run `notify_active`
    /// anyway — this is how a Partial→Detached transition is observed
    /// without any further pings. Runs forever.
    pub async fn run_age_notifier(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.state.config.max_age).await;
            if !self.auth_ticked.swap(false, Ordering::SeqCst) {
                self.notify_active().await;
            }
        }
    }

    /// Spawn the rescan loop unconditionally (no Tag gating, unlike
    /// `AllRunnerRoot`).
    pub async fn start(self: Arc<Self>) {
        let start_evt = Arc::new(Notify::new());
        let waiter = start_evt.notified();
        tokio::pin!(waiter);
        let root = self.clone();
        let evt = start_evt.clone();
        tokio::spawn(async move { RunnerRoot::run_now(root, evt).await });
        waiter.as_mut().await;
    }
}

#[async_trait::async_trait]
impl RunnerRoot for SingleRunnerRoot {
    fn state(&self) -> &RootState {
        &self.state
    }

    fn schedulable_entries(&self) -> Vec<Arc<JobEntry>> {
        let prefix = self.subtree_prefix();
        self.state
            .entries
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.value().clone())
            .collect()
    }

    fn initial_connectivity(&self) -> Option<ConnectivityState> {
        Some(ConnectivityState::from_u8(
            self.connectivity.load(Ordering::SeqCst),
        ))
    }
}
