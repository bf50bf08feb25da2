//! Wall-clock time helpers.
//!
//! Expiry instants are epoch milliseconds so that `PEXPIREAT` frames
//! round-trip through the append-only log byte-exactly.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Returns true if the given expiry instant has passed. An instant equal
/// to now counts as expired.
#[inline]
pub fn is_past(expires_at_ms: u64) -> bool {
    now_ms() >= expires_at_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn past_instants_are_expired() {
        assert!(is_past(0));
        assert!(is_past(now_ms()));
        assert!(!is_past(now_ms() + 60_000));
    }
}
