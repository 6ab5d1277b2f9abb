//! Open-loop pacing of send attempts.
//!
//! `acquire` hands back the *intended* start time of the operation instead of
//! blocking until it: a caller that has fallen behind keeps receiving
//! timestamps in the past, so the `send - intended` gap shows up as publish
//! delay instead of being silently absorbed (coordinated omission).

use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use msgbench_driver::ClockSource;

/// Below one message per second the interval arithmetic degenerates; clamp.
pub const MIN_RATE: f64 = 1.0;

/// Uniformly spaced emission times at a fixed rate. Immutable once built;
/// rate changes swap the whole limiter through a [`RateLimiterHandle`].
pub struct UniformRateLimiter {
    interval_ns: u64,
    next_ns: AtomicU64,
}

impl UniformRateLimiter {
    pub fn new(rate: f64, clock: &ClockSource) -> Self {
        let rate = if rate < MIN_RATE { MIN_RATE } else { rate };
        let interval_ns = (1e9 / rate) as u64;

        Self {
            interval_ns,
            next_ns: AtomicU64::new(clock.monotonic_ns()),
        }
    }

    /// Claims the next emission slot and returns its intended monotonic
    /// nanosecond timestamp. Never blocks; the caller sleeps until the
    /// returned instant before doing the work.
    pub fn acquire(&self) -> u64 {
        self.next_ns.fetch_add(self.interval_ns, Relaxed)
    }

    pub fn rate(&self) -> f64 {
        1e9 / self.interval_ns as f64
    }

    pub fn interval_ns(&self) -> u64 {
        self.interval_ns
    }
}

/// Swappable reference to the active rate limiter. Load tasks keep a cached
/// `Arc` and only touch the mutex when the generation counter moves, so the
/// hot path stays lock-free.
pub struct RateLimiterHandle {
    current: Mutex<Arc<UniformRateLimiter>>,
    generation: AtomicU64,
}

impl RateLimiterHandle {
    pub fn new(limiter: UniformRateLimiter) -> Self {
        Self {
            current: Mutex::new(Arc::new(limiter)),
            generation: AtomicU64::new(0),
        }
    }

    /// Replaces the active limiter. In-flight `acquire` results from the old
    /// limiter remain valid; tasks pick up the replacement at their next
    /// generation check.
    pub fn replace(&self, limiter: UniformRateLimiter) {
        *self.current.lock().unwrap() = Arc::new(limiter);
        self.generation.fetch_add(1, Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Acquire)
    }

    pub fn current(&self) -> Arc<UniformRateLimiter> {
        self.current.lock().unwrap().clone()
    }
}

/// Per-task view of a [`RateLimiterHandle`].
pub struct CachedLimiter {
    handle: Arc<RateLimiterHandle>,
    cached: Arc<UniformRateLimiter>,
    seen_generation: u64,
}

impl CachedLimiter {
    pub fn new(handle: Arc<RateLimiterHandle>) -> Self {
        let cached = handle.current();
        let seen_generation = handle.generation();

        Self {
            handle,
            cached,
            seen_generation,
        }
    }

    pub fn acquire(&mut self) -> u64 {
        let generation = self.handle.generation();
        if generation != self.seen_generation {
            self.cached = self.handle.current();
            self.seen_generation = generation;
        }

        self.cached.acquire()
    }
}

/// Granularity of the coarse sleep phase; also the cancellation latency
/// bound while waiting out long inter-message intervals at low rates.
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Below this remainder, spin instead of sleeping.
const SPIN_THRESHOLD_NS: u64 = 1_000_000;

/// Waits until the monotonic clock reaches `target_ns`: coarse sleeps down
/// to the last millisecond, then spin-yield for sub-millisecond precision.
/// Immune to spurious wakeups and signals; the only early exit is `cancel`.
/// Returns `false` when cancelled before the deadline.
pub fn sleep_until(clock: &ClockSource, target_ns: u64, cancel: &AtomicBool) -> bool {
    loop {
        let now = clock.monotonic_ns();
        if now >= target_ns {
            return true;
        }
        if cancel.load(Relaxed) {
            return false;
        }

        let remaining = target_ns - now;
        if remaining > SPIN_THRESHOLD_NS {
            let chunk = Duration::from_nanos(remaining - SPIN_THRESHOLD_NS).min(SLEEP_SLICE);
            std::thread::sleep(chunk);
        } else {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }
}
