//! Lock-free additive counters for the send/receive hot paths.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;

/// A 64-bit additive accumulator safe for many concurrent incrementers.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Relaxed);
    }

    pub fn sum(&self) -> u64 {
        self.0.load(Relaxed)
    }

    pub fn sum_and_reset(&self) -> u64 {
        self.0.swap(0, Relaxed)
    }
}

/// The worker's counter set: six interval counters harvested (and reset) by
/// every period snapshot, and three totals that survive until `stop_all`.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub messages_sent: Counter,
    pub bytes_sent: Counter,
    pub errors: Counter,
    pub poll_errors: Counter,
    pub messages_received: Counter,
    pub bytes_received: Counter,

    pub total_messages_sent: Counter,
    pub total_errors: Counter,
    pub total_messages_received: Counter,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the interval counters only.
    pub fn reset_session(&self) {
        self.messages_sent.sum_and_reset();
        self.bytes_sent.sum_and_reset();
        self.errors.sum_and_reset();
        self.poll_errors.sum_and_reset();
        self.messages_received.sum_and_reset();
        self.bytes_received.sum_and_reset();
    }

    /// Clears everything, totals included. Only `stop_all` does this.
    pub fn reset_all(&self) {
        self.reset_session();
        self.total_messages_sent.sum_and_reset();
        self.total_errors.sum_and_reset();
        self.total_messages_received.sum_and_reset();
    }
}
