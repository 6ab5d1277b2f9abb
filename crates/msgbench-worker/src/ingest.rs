//! The consumer-side ingest path: the callback handed to every consumer the
//! worker creates. Runs on driver delivery threads.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use msgbench_driver::{ClockSource, MessageCallback};

use crate::stats::WorkerStats;

/// While paused, delivery threads are parked in slices of this length; the
/// resulting back-pressure is intentional and reaches the driver's pipeline.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct ConsumerIngest {
    stats: Arc<WorkerStats>,
    clock: ClockSource,
    consumers_paused: Arc<AtomicBool>,
    test_completed: Arc<AtomicBool>,
}

impl ConsumerIngest {
    pub fn new(
        stats: Arc<WorkerStats>,
        clock: ClockSource,
        consumers_paused: Arc<AtomicBool>,
        test_completed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            stats,
            clock,
            consumers_paused,
            test_completed,
        }
    }

    fn pause_gate(&self) {
        while self.consumers_paused.load(Relaxed) && !self.test_completed.load(Relaxed) {
            std::thread::sleep(PAUSE_POLL_INTERVAL);
        }
    }
}

impl MessageCallback for ConsumerIngest {
    fn message_received(&self, payload: &[u8], publish_timestamp_ms: u64) {
        self.pause_gate();

        // Wall clocks across machines; skewed observations are dropped but
        // the message still counts.
        let e2e_us =
            self.clock.epoch_micros() as i64 - (publish_timestamp_ms as i64).saturating_mul(1_000);

        let e2e_us = if e2e_us > 0 { Some(e2e_us as u64) } else { None };
        self.stats.record_message_received(payload.len() as u64, e2e_us);
    }

    fn message_received_with_latency(&self, payload_size: u64, e2e_latency_ns: i64) {
        self.pause_gate();

        if e2e_latency_ns <= 0 {
            // The driver claimed to have measured this itself; a
            // non-positive value is a delivery defect, not skew.
            self.stats.record_message_received(payload_size, None);
            self.stats.record_poll_error();
            return;
        }

        self.stats
            .record_message_received(payload_size, Some(e2e_latency_ns as u64 / 1_000));
    }

    fn receive_error(&self) {
        self.stats.record_poll_error();
    }
}
