//! The error sink boundary.
//!
//! Records job exceptions for operator visibility. Best-effort by contract:
//! this must never raise into the runner, so the trait
//! method has no `Result` to propagate — implementations that can fail
//! (a flaky remote log service, say) must swallow their own errors.

use serde_json::{Map, Value};

/// One recorded exception.
#[derive(Debug, Clone)]
pub struct ExceptionRecord {
    /// Error kind discriminant (`"CodeResolution"`, `"JobException"`, ...).
    pub kind: &'static str,
    /// Full path of the JobEntry this exception belongs to.
    pub path: String,
    /// Human-readable description of the failure.
    pub error: String,
    /// The entry's `data` at the time of failure, for debugging context.
    pub data: Map<String, Value>,
    /// The one-shot comment describing why a cancel was issued, if any.
    pub comment: Option<String>,
}

/// Records job exceptions. Never raises into the runner.
#[async_trait::async_trait]
pub trait ErrorSink: Send + Sync + 'static {
    /// Record one exception. Must not panic or block indefinitely.
    async fn record_exc(&self, record: ExceptionRecord);
}

/// In-memory [`ErrorSink`] for tests: appends every record to a shared
/// vector a test can inspect afterwards.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// A sink that just remembers everything it was given.
    #[derive(Default)]
    pub struct InMemorySink {
        records: Mutex<Vec<ExceptionRecord>>,
    }

    impl InMemorySink {
        /// Create an empty sink.
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot the records recorded so far.
        pub async fn records(&self) -> Vec<ExceptionRecord> {
            self.records.lock().await.clone()
        }
    }

    #[async_trait::async_trait]
    impl ErrorSink for InMemorySink {
        async fn record_exc(&self, record: ExceptionRecord) {
            self.records.lock().await.push(record);
        }
    }
}
