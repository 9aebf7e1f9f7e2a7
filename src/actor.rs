//! The actor/gossip boundary.
//!
//! The actor is a round-robin leader-election and membership gossip service,
//! external to this crate. It yields a stream of [`ActorEvent`]s and accepts
//! a reported load value plus quorum enable/disable toggles. Exactly one
//! root owns an actor handle at a time and drains it in a dedicated task, so
//! delivery is arrival-ordered to a single consumer by construction.

/// Events emitted by the actor/gossip stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ActorEvent {
    /// A peer's periodic heartbeat, carrying its reported load (0-100,
    /// higher is freer).
    Ping {
        /// The node that sent the ping.
        node: String,
        /// Reported load value.
        value: u8,
    },
    /// This node has been elected leader for the current cycle.
    Tag,
    /// This node's leadership for the current cycle has ended.
    Untag,
    /// An authenticated ping from a core node, used as a pure connectivity
    /// signal by [`crate::single_runner::SingleRunnerRoot`].
    AuthPing {
        /// The core node that sent the authenticated ping.
        node: String,
    },
}

/// A handle to the actor/gossip stream.
///
/// Every method takes `&self`: implementations own whatever interior
/// mutability `recv` needs (typically a lock around its receiver half) so
/// that a root can hold a single `Arc<dyn Actor>` shared between the
/// dedicated task draining `recv` and whatever task reports load or toggles
/// quorum participation. Exactly one task should actually call `recv` in a
/// loop — ordered, single-consumer delivery is a calling convention, not
/// something the trait itself enforces.
#[async_trait::async_trait]
pub trait Actor: Send + Sync + 'static {
    /// Receive the next event, or `None` if the stream has ended
    /// (`ActorLoss`).
    async fn recv(&self) -> Option<ActorEvent>;

    /// Report this node's own load to the gossip layer.
    fn set_value(&self, value: u8);

    /// Declare participation in a quorum of `n` nodes.
    fn enable(&self, n: usize);

    /// Withdraw from quorum participation (`n` nodes remain declared).
    fn disable(&self, n: usize);
}

/// In-memory, channel-driven [`Actor`] for tests.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Shared record of side-channel calls a test can assert on.
    #[derive(Default)]
    pub struct FakeActorState {
        /// Last value reported via `set_value`.
        pub last_reported_load: AtomicU8,
        /// Whether quorum participation is currently enabled.
        pub quorum_enabled: AtomicBool,
        /// Last `n` passed to `enable`/`disable`.
        pub last_quorum_size: AtomicU8,
    }

    /// A driver handle: push events in, and a shared [`FakeActorState`] to
    /// inspect side-channel calls.
    pub struct FakeActorHandle {
        tx: mpsc::UnboundedSender<ActorEvent>,
        state: Arc<FakeActorState>,
    }

    impl FakeActorHandle {
        /// Push the next event the actor will yield from `recv`.
        pub fn push(&self, event: ActorEvent) {
            let _ = self.tx.send(event);
        }

        /// Inspect recorded side-channel state.
        pub fn state(&self) -> &FakeActorState {
            &self.state
        }
    }

    /// An [`Actor`] whose event stream is driven entirely by test code via a
    /// paired [`FakeActorHandle`].
    pub struct FakeActor {
        rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ActorEvent>>,
        state: Arc<FakeActorState>,
    }

    impl FakeActor {
        /// Build a fake actor and the handle used to drive it.
        pub fn new() -> (Self, FakeActorHandle) {
            let (tx, rx) = mpsc::unbounded_channel();
            let state = Arc::new(FakeActorState::default());
            (
                Self {
                    rx: tokio::sync::Mutex::new(rx),
                    state: state.clone(),
                },
                FakeActorHandle { tx, state },
            )
        }
    }

    #[async_trait::async_trait]
    impl Actor for FakeActor {
        async fn recv(&self) -> Option<ActorEvent> {
            self.rx.lock().await.recv().await
        }

        fn set_value(&self, value: u8) {
            self.state.last_reported_load.store(value, Ordering::SeqCst);
        }

        fn enable(&self, n: usize) {
            self.state.quorum_enabled.store(true, Ordering::SeqCst);
            self.state
                .last_quorum_size
                .store(n as u8, Ordering::SeqCst);
        }

        fn disable(&self, n: usize) {
            self.state.quorum_enabled.store(false, Ordering::SeqCst);
            self.state
                .last_quorum_size
                .store(n as u8, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeActor;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn fake_actor_yields_pushed_events_in_order() {
        let (actor, handle) = FakeActor::new();
        handle.push(ActorEvent::Tag);
        handle.push(ActorEvent::Ping {
            node: "a".into(),
            value: 50,
        });
        handle.push(ActorEvent::Untag);

        assert_eq!(actor.recv().await, Some(ActorEvent::Tag));
        assert_eq!(
            actor.recv().await,
            Some(ActorEvent::Ping {
                node: "a".into(),
                value: 50
            })
        );
        assert_eq!(actor.recv().await, Some(ActorEvent::Untag));
    }

    #[tokio::test]
    async fn fake_actor_records_side_channel_calls() {
        let (actor, handle) = FakeActor::new();
        actor.set_value(73);
        actor.enable(3);

        assert_eq!(handle.state().last_reported_load.load(Ordering::SeqCst), 73);
        assert!(handle.state().quorum_enabled.load(Ordering::SeqCst));
        assert_eq!(handle.state().last_quorum_size.load(Ordering::SeqCst), 3);

        actor.disable(3);
        assert!(!handle.state().quorum_enabled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropped_handle_ends_the_stream() {
        let (actor, handle) = FakeActor::new();
        drop(handle);
        assert_eq!(actor.recv().await, None);
    }
}
