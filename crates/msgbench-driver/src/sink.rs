//! Hierarchical metrics sink the worker and drivers emit into. The default
//! implementation discards everything; deployments wire a real exporter.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Mutex};

/// Unit of a latency value handed to an [`OpStatsRecorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyUnit {
    Micros,
    Millis,
}

/// A monotonically increasing exported counter.
pub trait SinkCounter: Send + Sync {
    fn add(&self, n: u64);

    fn inc(&self) {
        self.add(1);
    }
}

/// Records per-operation success events with a latency value.
pub trait OpStatsRecorder: Send + Sync {
    fn register_successful_event(&self, value: u64, unit: LatencyUnit);
}

/// A hierarchical namespace of counters and operation statistics.
pub trait MetricsSink: Send + Sync {
    fn scope(&self, name: &str) -> Arc<dyn MetricsSink>;

    fn counter(&self, name: &str) -> Arc<dyn SinkCounter>;

    fn op_stats(&self, name: &str) -> Arc<dyn OpStatsRecorder>;
}

/// Discards all metrics. The default when no exporter is configured.
pub struct NoopSink;

struct NoopInstrument;

impl SinkCounter for NoopInstrument {
    fn add(&self, _n: u64) {}
}

impl OpStatsRecorder for NoopInstrument {
    fn register_successful_event(&self, _value: u64, _unit: LatencyUnit) {}
}

impl MetricsSink for NoopSink {
    fn scope(&self, _name: &str) -> Arc<dyn MetricsSink> {
        Arc::new(NoopSink)
    }

    fn counter(&self, _name: &str) -> Arc<dyn SinkCounter> {
        Arc::new(NoopInstrument)
    }

    fn op_stats(&self, _name: &str) -> Arc<dyn OpStatsRecorder> {
        Arc::new(NoopInstrument)
    }
}

/// Accumulates sink traffic in memory, keyed by slash-joined scope path.
/// Used by tests to assert what the worker emitted.
#[derive(Default)]
pub struct RecordingSink {
    prefix: String,
    state: Arc<RecordingState>,
}

#[derive(Default)]
struct RecordingState {
    counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
    events: Mutex<HashMap<String, Arc<AtomicU64>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn path(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    /// Current value of the counter at `path`, zero if never touched.
    pub fn counter_value(&self, path: &str) -> u64 {
        self.state
            .counters
            .lock()
            .unwrap()
            .get(path)
            .map(|c| c.load(Relaxed))
            .unwrap_or(0)
    }

    /// Number of successful events registered at `path`.
    pub fn event_count(&self, path: &str) -> u64 {
        self.state
            .events
            .lock()
            .unwrap()
            .get(path)
            .map(|c| c.load(Relaxed))
            .unwrap_or(0)
    }
}

struct RecordingCounter(Arc<AtomicU64>);

impl SinkCounter for RecordingCounter {
    fn add(&self, n: u64) {
        self.0.fetch_add(n, Relaxed);
    }
}

impl OpStatsRecorder for RecordingCounter {
    fn register_successful_event(&self, _value: u64, _unit: LatencyUnit) {
        self.0.fetch_add(1, Relaxed);
    }
}

impl MetricsSink for RecordingSink {
    fn scope(&self, name: &str) -> Arc<dyn MetricsSink> {
        Arc::new(RecordingSink {
            prefix: self.path(name),
            state: self.state.clone(),
        })
    }

    fn counter(&self, name: &str) -> Arc<dyn SinkCounter> {
        let cell = self
            .state
            .counters
            .lock()
            .unwrap()
            .entry(self.path(name))
            .or_default()
            .clone();
        Arc::new(RecordingCounter(cell))
    }

    fn op_stats(&self, name: &str) -> Arc<dyn OpStatsRecorder> {
        let cell = self
            .state
            .events
            .lock()
            .unwrap()
            .entry(self.path(name))
            .or_default()
            .clone();
        Arc::new(RecordingCounter(cell))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_accepts_everything() {
        let sink = NoopSink;
        sink.counter("messages").add(10);
        sink.scope("producer")
            .op_stats("publish_latency")
            .register_successful_event(42, LatencyUnit::Micros);
    }

    #[test]
    fn recording_sink_tracks_scoped_counters() {
        let sink = RecordingSink::new();

        let counter = sink.counter("messages_sent");
        counter.inc();
        counter.add(4);

        let scoped = sink.scope("consumer");
        scoped.counter("messages_received").add(7);

        assert_eq!(sink.counter_value("messages_sent"), 5);
        assert_eq!(sink.counter_value("consumer/messages_received"), 7);
        assert_eq!(sink.counter_value("never_touched"), 0);
    }

    #[test]
    fn recording_sink_counts_op_stats_events() {
        let sink = RecordingSink::new();
        let stats = sink.op_stats("e2e_latency");

        stats.register_successful_event(100, LatencyUnit::Micros);
        stats.register_successful_event(200, LatencyUnit::Micros);

        assert_eq!(sink.event_count("e2e_latency"), 2);
    }
}
