//! Microsecond epoch timestamps and the per-session monotonic clock.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Current wall-clock time as microseconds since the Unix epoch (UTC).
pub fn now_us() -> i64 {
    Utc::now().timestamp_micros()
}

/// Monotonic microsecond source scoped to one alert session.
///
/// Every timestamp inside a session must be strictly increasing so the
/// timeline is reconstructible; if the wall clock has not advanced since the
/// previous stamp, the clock steps forward by 1µs instead.
#[derive(Debug, Default)]
pub struct SessionClock {
    last: AtomicI64,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_us(&self) -> i64 {
        let wall = now_us();
        let stamped = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wall.max(last + 1))
            })
            .expect("fetch_update closure never returns None");
        // fetch_update returns the previous value; recompute the stored one.
        wall.max(stamped + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_clock_is_strictly_monotonic() {
        let clock = SessionClock::new();
        let mut prev = clock.now_us();
        for _ in 0..10_000 {
            let next = clock.now_us();
            assert!(next > prev, "expected {next} > {prev}");
            prev = next;
        }
    }

    #[test]
    fn session_clock_tracks_wall_clock() {
        let clock = SessionClock::new();
        let stamp = clock.now_us();
        let wall = now_us();
        // Within a generous second of the wall clock.
        assert!((wall - stamp).abs() < 1_000_000);
    }
}
