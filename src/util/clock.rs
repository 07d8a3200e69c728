//! Wall-clock helpers.
//!
//! Scheduling decisions use `tokio::time::Instant`; wall-clock milliseconds are only
//! stamped onto results and audit events for downstream consumers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, or 0 if the system clock is before it.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
