//! Concurrent HDR histogram recording with interval/cumulative semantics.
//!
//! Producer tasks and driver completion threads all record into the same
//! metric. To keep them from serializing on one lock, each recorder is
//! sharded: a thread records into the shard picked by its process-wide
//! ordinal, and snapshots merge across shards. A value recorded while a
//! snapshot is in flight lands in either the closing interval or the next
//! one, never both and never nowhere.

use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

use hdrhistogram::Histogram;

/// Publish, schedule, and publish-delay latencies: 60 s in microseconds.
pub const SEND_LATENCY_MAX_US: u64 = 60_000_000;

/// End-to-end latency: 12 h in microseconds.
pub const E2E_LATENCY_MAX_US: u64 = 43_200_000_000;

const SIGNIFICANT_DIGITS: u8 = 5;

/// Shard memory scales with the histogram range at 5 significant digits, so
/// the fan-out is capped rather than matching very wide machines.
const MAX_SHARDS: usize = 8;

static NEXT_THREAD_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_SLOT: usize = NEXT_THREAD_SLOT.fetch_add(1, Relaxed);
}

fn new_histogram(max_value: u64) -> Histogram<u64> {
    Histogram::new_with_bounds(1, max_value, SIGNIFICANT_DIGITS)
        .expect("histogram bounds are compile-time constants")
}

/// One latency metric, recordable from many threads.
pub struct LatencyRecorder {
    shards: Box<[Mutex<Histogram<u64>>]>,
    max_value: u64,
}

impl LatencyRecorder {
    pub fn new(max_value: u64) -> Self {
        let num_shards = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_SHARDS);

        let shards = (0..num_shards)
            .map(|_| Mutex::new(new_histogram(max_value)))
            .collect();

        Self { shards, max_value }
    }

    /// Records one microsecond value, clamped into `[1, max_value]`.
    pub fn record(&self, value_us: u64) {
        let value = value_us.clamp(1, self.max_value);
        let slot = THREAD_SLOT.with(|slot| *slot);
        let shard = &self.shards[slot % self.shards.len()];

        // Equal bounds on every shard histogram make record infallible
        // after the clamp.
        shard
            .lock()
            .unwrap()
            .record(value)
            .expect("clamped value is within histogram bounds");
    }

    /// Drains every shard into a merged histogram holding exactly what was
    /// recorded since the previous snapshot. Each shard is merged and reset
    /// under its lock, so a concurrent record lands in either this interval
    /// or the next, never both.
    pub fn snapshot_and_reset(&self) -> Histogram<u64> {
        let mut merged = new_histogram(self.max_value);

        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            merged
                .add(&*shard)
                .expect("shard histograms share bounds with the merge target");
            shard.reset();
        }

        merged
    }

    /// Merges the current shard contents without clearing them.
    pub fn snapshot(&self) -> Histogram<u64> {
        let mut merged = new_histogram(self.max_value);

        for shard in &self.shards {
            merged
                .add(&*shard.lock().unwrap())
                .expect("shard histograms share bounds with the merge target");
        }

        merged
    }

    pub fn reset(&self) {
        for shard in &self.shards {
            shard.lock().unwrap().reset();
        }
    }
}

/// The interval/cumulative recorder pair every metric keeps: the interval
/// side is drained by each period snapshot, the cumulative side only by an
/// explicit stats reset.
pub struct RecorderPair {
    pub interval: LatencyRecorder,
    pub cumulative: LatencyRecorder,
}

impl RecorderPair {
    pub fn new(max_value: u64) -> Self {
        Self {
            interval: LatencyRecorder::new(max_value),
            cumulative: LatencyRecorder::new(max_value),
        }
    }

    pub fn record(&self, value_us: u64) {
        self.interval.record(value_us);
        self.cumulative.record(value_us);
    }

    pub fn reset(&self) {
        self.interval.reset();
        self.cumulative.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn snapshot_and_reset_drains_recorded_values() {
        let recorder = LatencyRecorder::new(SEND_LATENCY_MAX_US);
        recorder.record(100);
        recorder.record(200);
        recorder.record(300);

        let first = recorder.snapshot_and_reset();
        assert_eq!(first.len(), 3);
        assert_eq!(first.min(), 100);
        assert_eq!(first.max(), 300);

        let second = recorder.snapshot_and_reset();
        assert_eq!(second.len(), 0);
    }

    #[test]
    fn snapshot_does_not_clear() {
        let recorder = LatencyRecorder::new(SEND_LATENCY_MAX_US);
        recorder.record(50);

        assert_eq!(recorder.snapshot().len(), 1);
        assert_eq!(recorder.snapshot().len(), 1);
    }

    #[test]
    fn oversized_values_clamp_to_the_top_bucket() {
        let recorder = LatencyRecorder::new(SEND_LATENCY_MAX_US);
        recorder.record(u64::MAX);
        recorder.record(0);

        let histogram = recorder.snapshot();
        assert_eq!(histogram.len(), 2);
        assert!(histogram.max() <= SEND_LATENCY_MAX_US);
        assert!(histogram.min() >= 1);
    }

    #[test]
    fn interval_snapshots_tile_the_cumulative_view() {
        let pair = RecorderPair::new(SEND_LATENCY_MAX_US);

        for v in [10, 20, 30] {
            pair.record(v);
        }
        let first = pair.interval.snapshot_and_reset();

        for v in [40, 50] {
            pair.record(v);
        }
        let second = pair.interval.snapshot_and_reset();

        let cumulative = pair.cumulative.snapshot();
        assert_eq!(first.len() + second.len(), cumulative.len());
        assert_eq!(cumulative.len(), 5);
        assert_eq!(cumulative.min(), 10);
        assert_eq!(cumulative.max(), 50);
    }

    #[test]
    fn concurrent_recording_loses_nothing() {
        let recorder = Arc::new(LatencyRecorder::new(SEND_LATENCY_MAX_US));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for i in 0..5_000u64 {
                        recorder.record(1 + (t * 5_000 + i) % 1_000);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(recorder.snapshot().len(), 40_000);
    }

    #[test]
    fn e2e_bounds_accept_hour_scale_values() {
        let recorder = LatencyRecorder::new(E2E_LATENCY_MAX_US);
        recorder.record(3_600_000_000); // one hour in µs

        let histogram = recorder.snapshot();
        assert_eq!(histogram.len(), 1);
        // 5 significant digits keep hour-scale values within 0.01%
        let max = histogram.max();
        assert!(max >= 3_599_000_000 && max <= 3_601_000_000);
    }
}
