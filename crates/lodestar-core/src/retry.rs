//! Bounded exponential backoff shared by the supervisors.
//!
//! Both the component supervisor (process restarts) and the engine
//! connection supervisor (reconnect attempts) pace themselves with the same
//! schedule: an initial delay doubling per attempt, capped at a maximum.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A bounded exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSchedule {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub cap: Duration,
}

impl BackoffSchedule {
    /// Create a schedule with the given initial delay and cap.
    #[must_use]
    pub const fn new(initial: Duration, cap: Duration) -> Self {
        Self { initial, cap }
    }

    /// Schedule used for engine reconnection: 1 s doubling to a 30 s cap.
    #[must_use]
    pub const fn reconnect() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Schedule used for component restarts: 500 ms doubling to a 30 s cap.
    #[must_use]
    pub const fn restart() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }

    /// Delay for the given 0-indexed attempt.
    ///
    /// Attempt 0 waits `initial`; each subsequent attempt doubles, saturating
    /// at the cap.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.initial.saturating_mul(factor).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_sequence() {
        let schedule = BackoffSchedule::reconnect();
        assert_eq!(schedule.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(schedule.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(schedule.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(schedule.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_cap_holds_for_huge_attempts() {
        let schedule = BackoffSchedule::restart();
        assert_eq!(schedule.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }
}
