//! Structured error types for the runner.
//!
//! `RunnerError` is the only error type that crosses a public API boundary:
//! internal plumbing is free to use `anyhow::Result`, but anything handed to
//! an [`crate::errsink::ErrorSink`] or returned from a public method is one
//! of these variants.
//!
//! # The Error Boundary Rule
//!
//! Each variant corresponds to one error kind, distinguished by recovery
//! policy rather than by source module.

use thiserror::Error;

/// Errors raised by the runner core.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The code registry had no entry for the requested path.
    #[error("code not found: {path}")]
    CodeResolution {
        /// The code identifier that failed to resolve.
        path: String,
    },

    /// User code raised while running.
    #[error("job failed: {0}")]
    JobException(#[source] anyhow::Error),

    /// The entry's `node` changed to something else while we were running it.
    #[error("ownership lost: node reassigned mid-run")]
    OwnershipLoss,

    /// Persisting the entry at cleanup time failed. Non-fatal: the next
    /// rescan will observe and correct any resulting drift.
    #[error("persist failed: {0}")]
    PersistFailure(#[source] anyhow::Error),

    /// The watchdog did not see a leader tag (AllRunner) or an AuthPing
    /// (SingleRunner) within `max_age`. Fatal: the caller should tear the
    /// runner root down.
    #[error("starved: no tag/ping observed within max_age")]
    Starvation,

    /// The actor/gossip event stream ended.
    #[error("actor stream ended")]
    ActorLoss,
}

impl RunnerError {
    /// Whether this error should increment the entry's backoff counter.
    ///
    /// Code resolution and job exceptions retry with backoff; ownership loss
    /// counts once; persistence failures, starvation, and actor loss are not
    /// per-job retry concerns at all.
    pub fn increments_backoff(&self) -> bool {
        matches!(
            self,
            RunnerError::CodeResolution { .. }
                | RunnerError::JobException(_)
                | RunnerError::OwnershipLoss
        )
    }

    /// Whether this error is fatal to the runner root itself (not just the job).
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunnerError::Starvation | RunnerError::ActorLoss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_resolution_increments_backoff() {
        let e = RunnerError::CodeResolution {
            path: "foo.test".into(),
        };
        assert!(e.increments_backoff());
        assert!(!e.is_fatal());
    }

    #[test]
    fn ownership_loss_increments_backoff_once() {
        assert!(RunnerError::OwnershipLoss.increments_backoff());
    }

    #[test]
    fn persist_failure_does_not_increment_backoff() {
        let e = RunnerError::PersistFailure(anyhow::anyhow!("kv write timed out"));
        assert!(!e.increments_backoff());
        assert!(!e.is_fatal());
    }

    #[test]
    fn starvation_and_actor_loss_are_fatal() {
        assert!(RunnerError::Starvation.is_fatal());
        assert!(RunnerError::ActorLoss.is_fatal());
        assert!(!RunnerError::Starvation.increments_backoff());
    }

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            RunnerError::CodeResolution {
                path: "a.b".into()
            }
            .to_string(),
            "code not found: a.b"
        );
        assert_eq!(RunnerError::OwnershipLoss.to_string(), "ownership lost: node reassigned mid-run");
    }
}
