//! Wall-clock helpers.
//!
//! Timestamps throughout loam are integer milliseconds since the Unix epoch.
//! Integers (not ISO strings) because event ordering and lock TTLs do
//! arithmetic on them, and JSON numbers round-trip losslessly at this scale.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Saturates to 0 for clocks set before 1970 rather than panicking.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
