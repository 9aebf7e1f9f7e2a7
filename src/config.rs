//! Runner configuration.
//!
//! This crate does not load config from files or environment. Callers build
//! a [`RunnerConfig`] however they like (YAML, env vars, a CLI) and hand it
//! to [`crate::root::RunnerRoot`] construction.

use std::time::Duration;

/// Configuration recognized by both [`crate::all_runner::AllRunnerRoot`] and
/// [`crate::single_runner::SingleRunnerRoot`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// KV subtree where JobEntries live.
    pub path: String,

    /// Runner identity. Defaults to the KV client's own name if not set.
    pub name: Option<String>,

    /// Pacing between spawns in the rescan loop, to avoid a thundering herd.
    pub start_delay: Duration,

    /// Suffix joined with `"run"` to form the actor group identifier.
    pub group_suffix: Option<String>,

    /// Node names defining quorum. SingleRunner only; ignored by AllRunner.
    pub cores: Vec<String>,

    /// Whether losing the leader Tag also cancels in-flight jobs, not just
    /// new starts. AllRunner only. Default `false`.
    pub cancel_on_untag: bool,

    /// Bounded capacity of each job's inbound event queue.
    pub queue_len: usize,

    /// Maximum age a node's `seen` timestamp may reach in `node_history`
    /// before it is considered gone (AllRunner ghost cleanup) or the
    /// connectivity watchdog re-evaluates (SingleRunner). Derived from the
    /// actor's `cycle_time_max` and `history_size`; stored here once
    /// computed so both roots share one formula.
    pub max_age: Duration,
}

/// Default bounded queue capacity for a job's inbound event channel.
pub const DEFAULT_QLEN: usize = 10;

impl RunnerConfig {
    /// Start a config for the given KV subtree path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: None,
            start_delay: Duration::from_millis(100),
            group_suffix: None,
            cores: Vec::new(),
            cancel_on_untag: false,
            queue_len: DEFAULT_QLEN,
            max_age: Duration::from_secs(30),
        }
    }

    /// Set the runner identity explicitly.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the pacing delay between spawns.
    pub fn with_start_delay(mut self, d: Duration) -> Self {
        self.start_delay = d;
        self
    }

    /// Set the actor group suffix.
    pub fn with_group_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.group_suffix = Some(suffix.into());
        self
    }

    /// Set the quorum core node list (SingleRunner).
    pub fn with_cores(mut self, cores: Vec<String>) -> Self {
        self.cores = cores;
        self
    }

    /// Enable cancellation of in-flight jobs on Untag (AllRunner).
    pub fn with_cancel_on_untag(mut self, cancel: bool) -> Self {
        self.cancel_on_untag = cancel;
        self
    }

    /// Set the bounded per-job event queue capacity.
    pub fn with_queue_len(mut self, n: usize) -> Self {
        self.queue_len = n;
        self
    }

    /// Set the watchdog max-age window directly.
    pub fn with_max_age(mut self, d: Duration) -> Self {
        self.max_age = d;
        self
    }

    /// Compute the actor group identifier: `"run"` joined with the suffix.
    pub fn group(&self) -> String {
        match &self.group_suffix {
            Some(suffix) => format!("run.{suffix}"),
            None => "run".to_string(),
        }
    }

    /// `max_age = cycle_time_max * (history_size + 1.5)`, the AllRunner
    /// watchdog window.
    pub fn all_runner_max_age(cycle_time_max: Duration, history_size: usize) -> Duration {
        cycle_time_max.mul_f64(history_size as f64 + 1.5)
    }

    /// `max_age = cycle_time_max * 1.5`, the SingleRunner watchdog window.
    pub fn single_runner_max_age(cycle_time_max: Duration) -> Duration {
        cycle_time_max.mul_f64(1.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_without_suffix() {
        let cfg = RunnerConfig::new("/run");
        assert_eq!(cfg.group(), "run");
    }

    #[test]
    fn group_with_suffix() {
        let cfg = RunnerConfig::new("/run").with_group_suffix("jobs");
        assert_eq!(cfg.group(), "run.jobs");
    }

    #[test]
    fn all_runner_max_age_formula() {
        let d = RunnerConfig::all_runner_max_age(Duration::from_secs(2), 3);
        assert_eq!(d, Duration::from_secs_f64(2.0 * 4.5));
    }

    #[test]
    fn single_runner_max_age_formula() {
        let d = RunnerConfig::single_runner_max_age(Duration::from_secs(4));
        assert_eq!(d, Duration::from_secs_f64(6.0));
    }

    #[test]
    fn builder_chaining() {
        let cfg = RunnerConfig::new("/run")
            .with_name("node-a")
            .with_cores(vec!["node-a".into(), "node-b".into()])
            .with_cancel_on_untag(true)
            .with_queue_len(5);

        assert_eq!(cfg.name.as_deref(), Some("node-a"));
        assert_eq!(cfg.cores.len(), 2);
        assert!(cfg.cancel_on_untag);
        assert_eq!(cfg.queue_len, 5);
    }
}
