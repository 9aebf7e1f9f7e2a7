//! JobEntry: the persisted descriptor plus in-memory execution handle for
//! one job, and its scheduling/retry state machine.
//!
//! This is the core of the crate. A `JobEntry` owns nothing about *how* it
//! gets scheduled — that's `RunnerRoot`'s job — only *whether* it is due
//! (`should_start`) and *what happens* when it runs (`run`), plus reacting
//! to externally observed changes (`set_value`) and pushing connectivity
//! updates into whatever is currently running (`send_event`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::clock::now_secs;
use crate::codereg::{CallContext, CodeRegistry};
use crate::connectivity::ConnectivityState;
use crate::errsink::{ErrorSink, ExceptionRecord};
use crate::error::RunnerError;
use crate::kv::{JobAttributes, KvClient};

/// The three outcomes of [`JobEntry::should_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShouldStart {
    /// `code` is null, or `node` is already non-null (someone else owns it).
    DoNotStart,
    /// Due in `_0` seconds from `now` (always positive).
    Due(i64),
    /// Due now (or overdue).
    StartNow,
}

/// Transient state for one in-flight run.
struct Running {
    cancel: CancellationToken,
    events: mpsc::Sender<Option<ConnectivityState>>,
    sends_enabled: AtomicBool,
}

/// One job: its persisted attributes plus the handle to whatever is
/// currently running it, if anything.
pub struct JobEntry {
    /// Full KV path this entry is persisted at.
    path: String,
    node_name: String,
    queue_len: usize,

    kv: Arc<dyn KvClient>,
    registry: Arc<dyn CodeRegistry>,
    errsink: Arc<dyn ErrorSink>,

    attrs: RwLock<JobAttributes>,
    running: Mutex<Option<Running>>,
    /// One-shot reason for the next cancellation, consumed by `run()`.
    comment: Mutex<Option<String>>,
}

impl JobEntry {
    /// Wrap freshly-read (or freshly-created) attributes as a `JobEntry`
    /// belonging to `node_name`, running code resolved via `registry` and
    /// persisted through `kv`.
    pub fn new(
        path: impl Into<String>,
        node_name: impl Into<String>,
        attrs: JobAttributes,
        kv: Arc<dyn KvClient>,
        registry: Arc<dyn CodeRegistry>,
        errsink: Arc<dyn ErrorSink>,
        queue_len: usize,
    ) -> Self {
        Self {
            path: path.into(),
            node_name: node_name.into(),
            queue_len,
            kv,
            registry,
            errsink,
            attrs: RwLock::new(attrs),
            running: Mutex::new(None),
            comment: Mutex::new(None),
        }
    }

    /// Full KV path of this entry.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Snapshot the current persisted attributes.
    pub async fn snapshot(&self) -> JobAttributes {
        self.attrs.read().await.clone()
    }

    /// True if this node currently has a live task running this entry.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Decide whether this entry is due to start, per the rule in the
    /// scheduling table: `target > started` takes priority over a pending
    /// back-off, which in turn takes priority over steady-state idle.
    pub async fn should_start(&self, now: i64) -> ShouldStart {
        let attrs = self.attrs.read().await;
        if attrs.code.is_none() || attrs.node.is_some() {
            return ShouldStart::DoNotStart;
        }

        let due_at = if attrs.target > attrs.started {
            attrs.target
        } else if attrs.backoff > 0 {
            attrs.stopped + backoff_delay(attrs.delay, attrs.backoff)
        } else {
            return ShouldStart::DoNotStart;
        };

        let delta = due_at - now;
        if delta <= 0 {
            ShouldStart::StartNow
        } else {
            ShouldStart::Due(delta)
        }
    }

    /// Reschedule the next start to `t`, persisting immediately.
    pub async fn run_at(&self, t: i64) -> anyhow::Result<()> {
        let snapshot = {
            let mut attrs = self.attrs.write().await;
            attrs.target = t;
            attrs.clone()
        };
        self.kv.persist(&self.path, &snapshot).await
    }

    /// Clear ownership of this entry because its owning node has gone dark
    /// (AllRunner ghost cleanup). Swallows persist failures with a log, same
    /// as `run()`'s own cleanup step.
    pub async fn seems_down(&self) {
        let snapshot = {
            let mut attrs = self.attrs.write().await;
            attrs.node = None;
            attrs.clone()
        };
        if let Err(e) = self.kv.persist(&self.path, &snapshot).await {
            tracing::warn!(path = %self.path, error = %e, "failed to persist ghost cleanup");
        }
    }

    /// React to a KV replication of this entry with a new attribute bundle,
    /// cancelling any run we own per the decision table. Callers must signal
    /// the rescan loop afterward (this type has no back-reference to a
    /// root to do so itself).
    pub async fn set_value(&self, new: JobAttributes) {
        let was_self_owned = {
            let attrs = self.attrs.read().await;
            attrs.node.as_deref() == Some(self.node_name.as_str()) && self.is_running().await
        };

        if was_self_owned {
            let prior_code = self.attrs.read().await.code.clone();
            if new.code != prior_code {
                self.cancel_with_comment("Cancel: Code changed").await;
            } else {
                match &new.node {
                    Some(n) if n == &self.node_name => {}
                    Some(other) => {
                        self.cancel_with_comment(&format!("Cancel: Node set to '{other}'"))
                            .await;
                    }
                    None => {}
                }
            }
        }

        *self.attrs.write().await = new;
    }

    async fn cancel_with_comment(&self, comment: &str) {
        let running = self.running.lock().await;
        if let Some(r) = running.as_ref() {
            *self.comment.lock().await = Some(comment.to_string());
            r.cancel.cancel();
        }
    }

    /// Cancel a live run of this entry with an explicit comment, if one is
    /// in flight. Used by [`crate::all_runner::AllRunnerRoot`] when
    /// `cancel_on_untag` is set, outside the `set_value` decision table.
    pub async fn cancel_running(&self, comment: &str) {
        self.cancel_with_comment(comment).await;
    }

    /// Deliver a connectivity update to the running async job, per the
    /// overflow-sentinel policy: once the queue is within one slot of full,
    /// push the sentinel `None` and stop sending further updates so the job
    /// learns it is no longer being kept current.
    pub async fn send_event(&self, state: ConnectivityState) {
        let running = self.running.lock().await;
        let Some(r) = running.as_ref() else { return };
        if !r.sends_enabled.load(Ordering::SeqCst) {
            return;
        }

        if r.events.capacity() <= 1 {
            let _ = r.events.try_send(None);
            r.sends_enabled.store(false, Ordering::SeqCst);
            return;
        }
        let _ = r.events.try_send(Some(state));
    }

    /// Run this entry to completion. Preconditions (checked by the caller
    /// via `should_start`): `code` is set, `node` is null.
    ///
    /// `initial_connectivity` is pushed into the async job's queue before
    /// invocation; `SingleRunnerRoot` supplies the freshly-computed state,
    /// `AllRunnerRoot` passes `None`.
    pub async fn run(self: &Arc<Self>, initial_connectivity: Option<ConnectivityState>) {
        let code_path = match self.attrs.read().await.code.clone() {
            Some(c) => c,
            None => return,
        };

        let handle = match self.registry.resolve(&code_path).await {
            Some(h) => h,
            None => {
                self.finish(
                    Err(RunnerError::CodeResolution { path: code_path }),
                    None,
                )
                .await;
                return;
            }
        };

        let started = now_secs();
        let data = self.attrs.read().await.data.clone();

        let snapshot = {
            let mut attrs = self.attrs.write().await;
            attrs.started = started;
            attrs.node = Some(self.node_name.clone());
            attrs.clone()
        };
        if let Err(e) = self.kv.persist(&self.path, &snapshot).await {
            tracing::warn!(path = %self.path, error = %e, "failed to persist run start, aborting start");
            return;
        }

        match self.kv.read(&self.path).await {
            Ok(Some(current)) if current.node.as_deref() != Some(self.node_name.as_str()) => {
                // Someone else already claimed (or cleared) ownership
                // underneath us. Adopt the observed `node` into our
                // in-memory copy before finishing so `finish`'s "clear node
                // if it's still us" check sees the real owner and leaves
                // their claim alone instead of erasing it.
                self.attrs.write().await.node = current.node.clone();
                self.finish(Err(RunnerError::OwnershipLoss), None).await;
                return;
            }
            Ok(None) => {
                self.attrs.write().await.node = None;
                self.finish(Err(RunnerError::OwnershipLoss), None).await;
                return;
            }
            Ok(Some(_)) => {}
            Err(e) => {
                tracing::warn!(path = %self.path, error = %e, "failed to re-read entry after persisting start; proceeding optimistically");
            }
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.queue_len.max(1));
        {
            let mut running = self.running.lock().await;
            *running = Some(Running {
                cancel: cancel.clone(),
                events: tx.clone(),
                sends_enabled: AtomicBool::new(true),
            });
        }

        let ctx = CallContext {
            entry: self.path.clone(),
            node: self.node_name.clone(),
            client: self.kv.clone(),
            info: if handle.is_async { Some(rx) } else { None },
        };

        tracing::debug!(path = %self.path, code = %code_path, "job starting");

        let outcome = if handle.is_async {
            if let Some(state) = initial_connectivity {
                let _ = tx.try_send(Some(state));
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = handle.callable.call(data, ctx) => Some(res),
            }
        } else {
            Some(handle.callable.call(data, ctx).await)
        };

        let comment = self.comment.lock().await.take();
        {
            let mut running = self.running.lock().await;
            *running = None;
        }

        match outcome {
            None => {
                self.finish(
                    Err(RunnerError::JobException(anyhow::anyhow!(
                        comment.clone().unwrap_or_else(|| "cancelled".to_string())
                    ))),
                    comment,
                )
                .await;
            }
            Some(Ok(value)) => self.finish(Ok(value), None).await,
            Some(Err(e)) => {
                self.finish(Err(RunnerError::JobException(e)), comment)
                    .await
            }
        }
    }

    async fn finish(&self, outcome: Result<Value, RunnerError>, comment: Option<String>) {
        let stopped = now_secs();
        let snapshot = match outcome {
            Ok(value) => {
                let mut attrs = self.attrs.write().await;
                attrs.result = Some(value);
                attrs.backoff = 0;
                attrs.node = None;
                attrs.stopped = stopped;
                if attrs.repeat > 0 {
                    attrs.target = stopped + attrs.repeat as i64;
                }
                tracing::debug!(path = %self.path, "job completed");
                attrs.clone()
            }
            Err(err) => {
                tracing::warn!(path = %self.path, error = %err, "job failed");
                let data_snapshot = self.attrs.read().await.data.clone();
                self.errsink
                    .record_exc(ExceptionRecord {
                        kind: error_kind(&err),
                        path: self.path.clone(),
                        error: err.to_string(),
                        data: data_snapshot,
                        comment,
                    })
                    .await;

                let mut attrs = self.attrs.write().await;
                if err.increments_backoff() {
                    attrs.backoff += 1;
                }
                if attrs.node.as_deref() == Some(self.node_name.as_str()) {
                    attrs.node = None;
                }
                attrs.stopped = stopped;
                attrs.clone()
            }
        };

        if let Err(e) = self.kv.persist(&self.path, &snapshot).await {
            tracing::warn!(path = %self.path, error = %e, "failed to persist final entry state");
        }
    }
}

fn error_kind(err: &RunnerError) -> &'static str {
    match err {
        RunnerError::CodeResolution { .. } => "CodeResolution",
        RunnerError::JobException(_) => "JobException",
        RunnerError::OwnershipLoss => "OwnershipLoss",
        RunnerError::PersistFailure(_) => "PersistFailure",
        RunnerError::Starvation => "Starvation",
        RunnerError::ActorLoss => "ActorLoss",
    }
}

/// `stopped + delay * 2^backoff`, with the exponent capped at 30 so the
/// multiplication cannot overflow `i64` seconds.
fn backoff_delay(delay: u64, backoff: u32) -> i64 {
    let exp = backoff.min(30);
    delay.saturating_mul(1u64 << exp) as i64
}
