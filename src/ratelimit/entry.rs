//! Fixed-window limit entries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The counter and window boundary tracked for one `prefix:identifier` key.
///
/// `count` includes rejected attempts: once the quota is exhausted, further
/// requests in the same window keep incrementing it until the window rolls
/// over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitEntry {
    /// Requests observed in the current window.
    pub count: u64,
    /// Epoch milliseconds at which the current window ends.
    pub reset_time: u64,
}

impl LimitEntry {
    /// Open a fresh window anchored at `now` holding the first request.
    pub fn open(now: u64, window: Duration) -> Self {
        Self {
            count: 1,
            reset_time: now.saturating_add(window_ms(window)),
        }
    }

    /// Whether the window has ended. The instant `now == reset_time` still
    /// belongs to the window.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.reset_time
    }

    /// Record one request at `now`, rolling the window over if it has ended.
    pub fn record(&mut self, now: u64, window: Duration) {
        if self.is_expired(now) {
            *self = Self::open(now, window);
        } else {
            self.count = self.count.saturating_add(1);
        }
    }

    /// Quota left under `limit`, clamped at zero.
    pub fn remaining(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.count)
    }
}

/// Window length in whole milliseconds.
pub(crate) fn window_ms(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_open_anchors_at_now() {
        let entry = LimitEntry::open(1_000, MINUTE);
        assert_eq!(entry.count, 1);
        assert_eq!(entry.reset_time, 61_000);
    }

    #[test]
    fn test_expiry_is_strict() {
        let entry = LimitEntry::open(0, MINUTE);
        assert!(!entry.is_expired(60_000));
        assert!(entry.is_expired(60_001));
    }

    #[test]
    fn test_record_within_window_increments() {
        let mut entry = LimitEntry::open(0, MINUTE);
        entry.record(10, MINUTE);
        entry.record(20, MINUTE);

        assert_eq!(entry.count, 3);
        assert_eq!(entry.reset_time, 60_000);
    }

    #[test]
    fn test_record_after_expiry_reopens() {
        let mut entry = LimitEntry::open(0, MINUTE);
        entry.record(10, MINUTE);

        entry.record(60_001, MINUTE);
        assert_eq!(entry.count, 1);
        assert_eq!(entry.reset_time, 120_001);
    }

    #[test]
    fn test_remaining_clamps_at_zero() {
        let entry = LimitEntry {
            count: 7,
            reset_time: 0,
        };
        assert_eq!(entry.remaining(10), 3);
        assert_eq!(entry.remaining(5), 0);
    }
}
