//! # runnerd
//!
//! A distributed job runner layered on a replicated key-value store. Job
//! descriptors live in the store; at any instant the cluster ensures each
//! eligible job is executed by exactly one live node (the cluster-wide
//! variant) or by its designated local node (the per-node variant), with
//! automatic restart after success or failure, graceful handover when the
//! owning node fails, and a watchdog against starvation.
//!
//! ## Architecture
//!
//! ```text
//! KV replication ──▶ JobEntry::set_value ──▶ trigger_rescan()
//!                                                  │
//!                                                  ▼
//!                                    RunnerRoot::run_now (rescan pump)
//!                                                  │
//!                              should_start(now) on every JobEntry
//!                                                  │
//!                               ┌──────────────────┴──────────────────┐
//!                               ▼                                     ▼
//!                        spawn JobEntry::run                  remember smallest
//!                                                              pending delay
//! ```
//!
//! `AllRunnerRoot` and `SingleRunnerRoot` both embed [`root::RootState`] and
//! implement [`root::RunnerRoot`], which supplies the rescan pump as a
//! default trait method. The two variants differ in what gates scheduling
//! (the actor's leader Tag, vs. nothing) and what they do with the actor's
//! event stream (membership gossip plus a watchdog, vs. a pure connectivity
//! signal).
//!
//! ## External collaborators
//!
//! Four things this crate needs are deliberately left as opaque interfaces,
//! each with an in-memory test double behind the `testing` feature (or
//! `cfg(test)`):
//!
//! - [`kv::KvClient`] — persists and reads JobEntry attribute bundles.
//! - [`actor::Actor`] — the gossip/leader-election event stream.
//! - [`codereg::CodeRegistry`] — resolves a job's `code` to a callable.
//! - [`errsink::ErrorSink`] — records job exceptions for operator visibility.
//!
//! None of these four gets a production implementation here; this crate
//! only defines the trait shape callers implement against and the fakes
//! used to exercise the runner's own logic in tests.

mod clock;

pub mod actor;
pub mod all_runner;
pub mod codereg;
pub mod config;
pub mod connectivity;
pub mod entry;
pub mod error;
pub mod errsink;
pub mod history;
pub mod kv;
pub mod registry;
pub mod root;
pub mod single_runner;

pub use actor::{Actor, ActorEvent};
pub use all_runner::AllRunnerRoot;
pub use codereg::{CallContext, CodeHandle, CodeRegistry, ConnectivityQueueItem, JobCallable};
pub use config::RunnerConfig;
pub use connectivity::ConnectivityState;
pub use entry::{JobEntry, ShouldStart};
pub use error::RunnerError;
pub use errsink::{ErrorSink, ExceptionRecord};
pub use history::NodeHistory;
pub use kv::{JobAttributes, KvClient, KvUpdate};
pub use registry::{NodeHandle, NodeRegistry};
pub use root::{RootState, RunnerRoot};
pub use single_runner::SingleRunnerRoot;

pub use async_trait::async_trait;
