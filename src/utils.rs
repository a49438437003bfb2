//! Small helpers shared by the brokers and the worker loop.

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Delay before the next poll after `empty_polls` empty claims in a row.
///
/// Doubles from `base_ms` and is capped at `max_ms`.
pub fn idle_backoff(empty_polls: u32, base_ms: u64, max_ms: u64) -> u64 {
    if empty_polls == 0 {
        return 0;
    }
    let shift = (empty_polls - 1).min(16);
    base_ms.saturating_mul(1u64 << shift).min(max_ms.max(base_ms))
}
