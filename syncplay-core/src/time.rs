use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// How many ticks fit in a millisecond. A tick is 100 nanoseconds.
pub const TICKS_PER_MILLISECOND: i64 = 10_000;
/// How many ticks fit in a second.
pub const TICKS_PER_SECOND: i64 = TICKS_PER_MILLISECOND * 1000;

/// Converts a tick count to a duration, truncating below tick precision.
pub fn duration_from_ticks(ticks: i64) -> Duration {
    Duration::microseconds(ticks / 10)
}

/// Converts a duration to ticks.
pub fn ticks_from_duration(duration: Duration) -> i64 {
    duration.num_microseconds().unwrap_or(i64::MAX / 10) * 10
}

/// Represents a type that acts as the single source of "now".
///
/// Everything that needs wall clock time receives one of these, so tests
/// can drive time manually with a [ManualClock].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system UTC clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Sets the clock to an absolute point in time.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_conversion() {
        let one_second = Duration::seconds(1);

        assert_eq!(ticks_from_duration(one_second), TICKS_PER_SECOND);
        assert_eq!(duration_from_ticks(TICKS_PER_SECOND), one_second);

        let ten_ms = Duration::milliseconds(10);
        assert_eq!(
            ticks_from_duration(ten_ms),
            10 * TICKS_PER_MILLISECOND,
            "ten milliseconds in ticks"
        );
    }

    #[test]
    fn test_manual_clock() {
        let start = Utc::now();
        let clock = ManualClock::new(start);

        assert_eq!(clock.now(), start, "starts at the given time");

        clock.advance(Duration::seconds(10));
        assert_eq!(clock.now(), start + Duration::seconds(10), "moves forward");
    }
}
