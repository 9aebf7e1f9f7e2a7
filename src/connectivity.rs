//! Connectivity status derivation for [`crate::single_runner::SingleRunnerRoot`].
//!
//! A single-runner node only ever hears `AuthPing`s from the cluster's core
//! nodes, never a full membership view, so it cannot know it has reached
//! quorum the way the all-runner side can. Instead it infers a coarse status
//! from how many distinct core nodes it has recently heard from against the
//! configured `n_nodes`, and pushes that status into any job currently
//! running so the job itself can decide how to react to degraded
//! connectivity.

use crate::history::NodeHistory;

/// Coarse connectivity status pushed to running jobs via `_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// No corroborating signal at all: either nothing has been heard from,
    /// or the only node ever heard from is this node itself.
    Detached,
    /// Heard from at least one other core node, but not yet from all of
    /// them.
    Partial,
    /// Heard from at least `n_nodes` distinct core nodes.
    Complete,
}

impl ConnectivityState {
    /// Encode as a small integer, for storage in an `AtomicU8`.
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectivityState::Detached => 0,
            ConnectivityState::Partial => 1,
            ConnectivityState::Complete => 2,
        }
    }

    /// Decode from [`ConnectivityState::to_u8`]. Any value other than `0`/`1`
    /// decodes to `Complete`, so an un-initialized `AtomicU8` (which starts
    /// at `0`) decodes to `Detached`, the correct initial state.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectivityState::Detached,
            1 => ConnectivityState::Partial,
            _ => ConnectivityState::Complete,
        }
    }
}

/// Derive the current [`ConnectivityState`] from `history` against the
/// configured cluster size `n_nodes`.
///
/// `self_name` distinguishes "never heard from anyone" from "only ever
/// heard from myself" — both collapse to `Detached`, but the first can
/// arise before `n_nodes` is even known, while the second is the seed
/// state of a freshly-started node pinging its own auth channel.
pub fn derive(history: &NodeHistory, self_name: &str, n_nodes: usize) -> ConnectivityState {
    if history.is_empty() {
        return ConnectivityState::Detached;
    }
    if history.only_contains(self_name) {
        return ConnectivityState::Detached;
    }
    if n_nodes > 0 && history.len() >= n_nodes {
        return ConnectivityState::Complete;
    }
    ConnectivityState::Partial
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_is_detached() {
        let h = NodeHistory::new(8);
        assert_eq!(derive(&h, "self", 3), ConnectivityState::Detached);
    }

    #[test]
    fn only_self_is_detached() {
        let h = NodeHistory::new(8);
        h.touch("self");
        assert_eq!(derive(&h, "self", 3), ConnectivityState::Detached);
    }

    #[test]
    fn below_n_nodes_is_partial() {
        let h = NodeHistory::new(8);
        h.touch("self");
        h.touch("peer-a");
        assert_eq!(derive(&h, "self", 3), ConnectivityState::Partial);
    }

    #[test]
    fn reaching_n_nodes_is_complete() {
        let h = NodeHistory::new(8);
        h.touch("self");
        h.touch("peer-a");
        h.touch("peer-b");
        assert_eq!(derive(&h, "self", 3), ConnectivityState::Complete);
    }

    #[test]
    fn exceeding_n_nodes_stays_complete() {
        let h = NodeHistory::new(8);
        h.touch("self");
        h.touch("peer-a");
        h.touch("peer-b");
        h.touch("peer-c");
        assert_eq!(derive(&h, "self", 3), ConnectivityState::Complete);
    }
}
