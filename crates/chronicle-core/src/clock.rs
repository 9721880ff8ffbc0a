//! Clock abstraction for deterministic timestamps.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Source of `created_at`/`updated_at` stamps for stored entries.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system clock.
///
/// Timestamps are truncated to whole microseconds, the precision of a
/// PostgreSQL `TIMESTAMPTZ`, so entries read back from any backend compare
/// equal to the ones that were written.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        now.duration_trunc(TimeDelta::microseconds(1)).unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_has_microsecond_precision() {
        let now = SystemClock.now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
    }
}
