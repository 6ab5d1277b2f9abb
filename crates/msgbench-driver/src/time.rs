use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ClockSource::{Mock, System};

/// A source of time providing both a monotonic nanosecond clock (for pacing
/// and latency measurement) and the wall clock (for cross-machine publish
/// timestamps).
#[derive(Debug, Clone)]
pub enum ClockSource {
    /// Clock source based on `Instant` and the system clock.
    System,

    /// Manually-advanced clock. Only for testing.
    Mock(Arc<MockClock>),
}

/// Backing state for [`ClockSource::Mock`]. Cloned `ClockSource` values
/// share the same underlying time.
#[derive(Debug)]
pub struct MockClock {
    monotonic_ns: AtomicU64,
    wall_us: AtomicU64,
}

fn monotonic_anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

impl ClockSource {
    pub fn new_mock() -> ClockSource {
        Mock(Arc::new(MockClock {
            monotonic_ns: AtomicU64::new(0),
            wall_us: AtomicU64::new(0),
        }))
    }

    /// Nanoseconds on a monotonic clock whose origin is arbitrary but fixed
    /// for the life of the process.
    pub fn monotonic_ns(&self) -> u64 {
        match self {
            System => monotonic_anchor().elapsed().as_nanos() as u64,
            Mock(clock) => clock.monotonic_ns.load(SeqCst),
        }
    }

    /// Microseconds since the UNIX epoch on the wall clock.
    pub fn epoch_micros(&self) -> u64 {
        match self {
            System => match SystemTime::now().duration_since(UNIX_EPOCH) {
                Ok(n) => n.as_micros() as u64,
                Err(e) => panic!("SystemTime before UNIX EPOCH! {e:?}"),
            },
            Mock(clock) => clock.wall_us.load(SeqCst),
        }
    }

    /// Milliseconds since the UNIX epoch on the wall clock.
    pub fn epoch_millis(&self) -> u64 {
        self.epoch_micros() / 1_000
    }

    /// Advances both the monotonic and wall clocks of a Mock clock.
    /// For test use only.
    pub fn advance(&self, delta: Duration) {
        match self {
            System => unreachable!(),
            Mock(clock) => {
                clock.monotonic_ns.fetch_add(delta.as_nanos() as u64, SeqCst);
                clock.wall_us.fetch_add(delta.as_micros() as u64, SeqCst);
            }
        }
    }

    /// Sets the wall clock of a Mock clock, leaving the monotonic clock
    /// untouched. For skew tests only.
    pub fn set_wall_micros(&self, wall_us: u64) {
        match self {
            System => unreachable!(),
            Mock(clock) => clock.wall_us.store(wall_us, SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_monotonic_advances() {
        let clock = System;
        let a = clock.monotonic_ns();
        let b = clock.monotonic_ns();
        assert!(b >= a);
    }

    #[test]
    fn mock_starts_at_zero_and_advances() {
        let clock = ClockSource::new_mock();
        assert_eq!(clock.monotonic_ns(), 0);
        assert_eq!(clock.epoch_millis(), 0);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.monotonic_ns(), 1_500_000_000);
        assert_eq!(clock.epoch_micros(), 1_500_000);
        assert_eq!(clock.epoch_millis(), 1_500);
    }

    #[test]
    fn cloned_mock_clocks_share_underlying_time() {
        let clock1 = ClockSource::new_mock();
        let clock2 = clock1.clone();

        clock1.advance(Duration::from_secs(2));
        assert_eq!(clock2.monotonic_ns(), 2_000_000_000);
    }

    #[test]
    fn wall_clock_is_independently_settable() {
        let clock = ClockSource::new_mock();
        clock.advance(Duration::from_secs(1));

        clock.set_wall_micros(5_000_000);
        assert_eq!(clock.epoch_millis(), 5_000);
        assert_eq!(clock.monotonic_ns(), 1_000_000_000);
    }
}
