//! Wall-clock time as epoch seconds.
//!
//! Every timestamp in [`crate::kv::JobAttributes`] (`target`, `started`,
//! `stopped`) is epoch seconds, matching the KV entry schema. Centralized
//! here so `entry`, `root`, `all_runner`, and `single_runner` agree on one
//! source of "now". Uses `chrono::Utc` rather than reading `SystemTime`
//! directly.

use chrono::Utc;

/// The current time as epoch seconds.
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}
