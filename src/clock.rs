//! Strictly increasing access-time clock.
//!
//! Wall-clock resolution is not enough to order two origins touched in the
//! same tick, so every stamp is `max(now, last + 1)` in microseconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Access timestamp in microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Hybrid wall/logical clock shared by everything that stamps access times.
#[derive(Debug, Default)]
pub struct LogicalClock {
    last: AtomicU64,
}

impl LogicalClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp, strictly greater than every one issued or observed before.
    pub fn now(&self) -> Timestamp {
        let wall = wall_clock_micros();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(wall.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        Timestamp(wall.max(prev.saturating_add(1)))
    }

    /// Advance past a timestamp loaded from persistent state.
    pub fn observe(&self, ts: Timestamp) {
        self.last.fetch_max(ts.0, Ordering::AcqRel);
    }

    /// Last issued or observed timestamp.
    #[must_use]
    pub fn last(&self) -> Timestamp {
        Timestamp(self.last.load(Ordering::Acquire))
    }
}

fn wall_clock_micros() -> u64 {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    u64::try_from(micros).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_wall_clock_is_microseconds_since_epoch() {
        // 2020-01-01T00:00:00Z in microseconds
        let micros = wall_clock_micros();
        assert!(micros > 1_577_836_800_000_000);
        assert!(micros < u64::MAX);
    }

    #[test]
    fn test_stamps_strictly_increase() {
        let clock = LogicalClock::new();
        let mut prev = clock.now();
        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next > prev, "{next} should be after {prev}");
            prev = next;
        }
    }

    #[test]
    fn test_observe_moves_clock_forward() {
        let clock = LogicalClock::new();
        let far_future = Timestamp::from_micros(u64::MAX / 2);
        clock.observe(far_future);
        assert!(clock.now() > far_future);
    }

    #[test]
    fn test_observe_never_moves_backwards() {
        let clock = LogicalClock::new();
        let a = clock.now();
        clock.observe(Timestamp::from_micros(1));
        assert!(clock.last() >= a);
    }

    #[test]
    fn test_concurrent_stamps_are_unique() {
        let clock = Arc::new(LogicalClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || (0..1000).map(|_| clock.now()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<Timestamp> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total, "no two stamps may be equal");
    }
}
