//! Bounded recency tracking of node sightings (`node_history`).
//!
//! Both runner variants maintain one of these: [`crate::all_runner::AllRunnerRoot`]
//! appends on every `Ping`, and scans it from the oldest end to find nodes
//! that have gone quiet (ghost cleanup); [`crate::single_runner::SingleRunnerRoot`]
//! appends on every `AuthPing` and uses its length to derive connectivity.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

/// A bounded, recency-ordered set of "last seen" timestamps per node name.
pub struct NodeHistory {
    inner: Mutex<LruCache<String, Instant>>,
}

impl NodeHistory {
    /// Create a history bounded to `capacity` distinct nodes.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record a sighting of `node` now, promoting it to most-recently-seen.
    pub fn touch(&self, node: &str) {
        self.inner
            .lock()
            .expect("node history mutex poisoned")
            .put(node.to_string(), Instant::now());
    }

    /// Number of distinct nodes currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("node history mutex poisoned").len()
    }

    /// True if the history is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the only node ever seen is `name` (the Detached case where a
    /// node has only ever observed itself).
    pub fn only_contains(&self, name: &str) -> bool {
        let guard = self.inner.lock().expect("node history mutex poisoned");
        guard.len() == 1 && guard.peek(name).is_some()
    }

    /// Remove `node` from the history (used after ghost cleanup evicts it).
    pub fn remove(&self, node: &str) {
        self.inner
            .lock()
            .expect("node history mutex poisoned")
            .pop(node);
    }

    /// Nodes whose last sighting is older than `max_age`, oldest first.
    ///
    /// Used by [`crate::all_runner::AllRunnerRoot::cleanup_nodes`] to find
    /// ghost ownership candidates.
    pub fn stale(&self, max_age: Duration) -> Vec<String> {
        let guard = self.inner.lock().expect("node history mutex poisoned");
        let now = Instant::now();
        let mut entries: Vec<(String, Instant)> = guard
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .filter(|(_, seen)| now.duration_since(*seen) > max_age)
            .collect();
        entries.sort_by_key(|(_, seen)| *seen);
        entries.into_iter().map(|(k, _)| k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn empty_history_has_zero_len() {
        let h = NodeHistory::new(8);
        assert!(h.is_empty());
        assert_eq!(h.len(), 0);
    }

    #[test]
    fn touch_adds_and_promotes() {
        let h = NodeHistory::new(8);
        h.touch("a");
        h.touch("b");
        assert_eq!(h.len(), 2);
        assert!(!h.only_contains("a"));
    }

    #[test]
    fn only_contains_self() {
        let h = NodeHistory::new(8);
        h.touch("a");
        assert!(h.only_contains("a"));
        assert!(!h.only_contains("b"));

        h.touch("b");
        assert!(!h.only_contains("a"));
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let h = NodeHistory::new(2);
        h.touch("a");
        h.touch("b");
        h.touch("c"); // evicts "a"

        assert_eq!(h.len(), 2);
        assert!(!h.only_contains("a"));
    }

    #[test]
    fn stale_returns_oldest_first_past_max_age() {
        let h = NodeHistory::new(8);
        h.touch("a");
        sleep(Duration::from_millis(20));
        h.touch("b");

        let stale = h.stale(Duration::from_millis(10));
        assert_eq!(stale, vec!["a".to_string()]);
    }

    #[test]
    fn remove_drops_a_node() {
        let h = NodeHistory::new(8);
        h.touch("a");
        h.remove("a");
        assert!(h.is_empty());
    }
}
