//! Worker-wide statistics: the counter set, the four latency recorder
//! pairs, and the snapshot API a coordinator polls.

pub mod counters;
pub mod recorder;

use std::sync::Arc;

use hdrhistogram::Histogram;
use msgbench_driver::sink::{LatencyUnit, OpStatsRecorder, SinkCounter};
use msgbench_driver::{MetricsSink, NoopSink};

use crate::stats::counters::SessionCounters;
use crate::stats::recorder::{E2E_LATENCY_MAX_US, RecorderPair, SEND_LATENCY_MAX_US};

/// One interval's worth of statistics. Counters are drained by the snapshot
/// that produced this; the histograms hold exactly the samples recorded
/// since the previous period snapshot.
#[derive(Clone)]
pub struct PeriodStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub errors: u64,
    pub poll_errors: u64,
    pub messages_received: u64,
    pub bytes_received: u64,

    pub total_messages_sent: u64,
    pub total_errors: u64,
    pub total_messages_received: u64,

    pub publish_latency: Histogram<u64>,
    pub publish_delay_latency: Histogram<u64>,
    pub schedule_latency: Histogram<u64>,
    pub end_to_end_latency: Histogram<u64>,
}

/// Whole-run latency distributions, left intact by the snapshot.
#[derive(Clone)]
pub struct CumulativeLatencies {
    pub publish_latency: Histogram<u64>,
    pub publish_delay_latency: Histogram<u64>,
    pub schedule_latency: Histogram<u64>,
    pub end_to_end_latency: Histogram<u64>,
}

/// Totals-only view.
#[derive(Debug, Clone, Copy)]
pub struct CountersStats {
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Shared by the load engine, the consumer ingest path, and the snapshot
/// API. Every mutation is lock-free or shard-local; see the recorder module.
pub struct WorkerStats {
    counters: SessionCounters,

    publish: RecorderPair,
    publish_delay: RecorderPair,
    schedule: RecorderPair,
    end_to_end: RecorderPair,

    sink_messages_sent: Arc<dyn SinkCounter>,
    sink_bytes_sent: Arc<dyn SinkCounter>,
    sink_errors: Arc<dyn SinkCounter>,
    sink_messages_received: Arc<dyn SinkCounter>,
    sink_bytes_received: Arc<dyn SinkCounter>,
    sink_publish_latency: Arc<dyn OpStatsRecorder>,
    sink_end_to_end_latency: Arc<dyn OpStatsRecorder>,
}

impl WorkerStats {
    pub fn new(sink: &dyn MetricsSink) -> Self {
        let scope = sink.scope("benchmark");

        Self {
            counters: SessionCounters::new(),
            publish: RecorderPair::new(SEND_LATENCY_MAX_US),
            publish_delay: RecorderPair::new(SEND_LATENCY_MAX_US),
            schedule: RecorderPair::new(SEND_LATENCY_MAX_US),
            end_to_end: RecorderPair::new(E2E_LATENCY_MAX_US),
            sink_messages_sent: scope.counter("messages_sent"),
            sink_bytes_sent: scope.counter("bytes_sent"),
            sink_errors: scope.counter("produce_errors"),
            sink_messages_received: scope.counter("messages_received"),
            sink_bytes_received: scope.counter("bytes_received"),
            sink_publish_latency: scope.op_stats("publish_latency"),
            sink_end_to_end_latency: scope.op_stats("end_to_end_latency"),
        }
    }

    pub fn with_noop_sink() -> Self {
        Self::new(&NoopSink)
    }

    /// Send completion accounting: counters, publish latency, publish delay.
    pub fn record_message_sent(&self, payload_len: u64, publish_us: u64, delay_us: u64) {
        self.counters.messages_sent.inc();
        self.counters.total_messages_sent.inc();
        self.counters.bytes_sent.add(payload_len);

        self.publish.record(publish_us);
        self.publish_delay.record(delay_us);

        self.sink_messages_sent.inc();
        self.sink_bytes_sent.add(payload_len);
        self.sink_publish_latency
            .register_successful_event(publish_us, LatencyUnit::Micros);
    }

    /// Recorded on the submitting thread right after `send_async` returns.
    pub fn record_schedule_latency(&self, schedule_us: u64) {
        self.schedule.record(schedule_us);
    }

    pub fn record_send_error(&self) {
        self.counters.errors.inc();
        self.counters.total_errors.inc();
        self.sink_errors.inc();
    }

    /// Receive accounting. `e2e_us` is `None` when the observation was
    /// dropped (clock skew); the message still counts.
    pub fn record_message_received(&self, payload_len: u64, e2e_us: Option<u64>) {
        self.counters.messages_received.inc();
        self.counters.total_messages_received.inc();
        self.counters.bytes_received.add(payload_len);

        self.sink_messages_received.inc();
        self.sink_bytes_received.add(payload_len);

        if let Some(e2e_us) = e2e_us {
            self.end_to_end.record(e2e_us);
            self.sink_end_to_end_latency
                .register_successful_event(e2e_us, LatencyUnit::Micros);
        }
    }

    pub fn record_poll_error(&self) {
        self.counters.poll_errors.inc();
    }

    /// Probe sends verify reachability without polluting the session stats;
    /// only the sent total moves.
    pub fn record_probe_sent(&self) {
        self.counters.total_messages_sent.inc();
    }

    /// Drains the interval counters and recorders. Counter reads precede the
    /// recorder swaps, so a completion landing between the two may have its
    /// latency in this period's histogram while its message/byte counts fall
    /// into the next period. Bounded by in-flight sends per snapshot.
    pub fn period_stats(&self) -> PeriodStats {
        let c = &self.counters;

        PeriodStats {
            messages_sent: c.messages_sent.sum_and_reset(),
            bytes_sent: c.bytes_sent.sum_and_reset(),
            errors: c.errors.sum_and_reset(),
            poll_errors: c.poll_errors.sum_and_reset(),
            messages_received: c.messages_received.sum_and_reset(),
            bytes_received: c.bytes_received.sum_and_reset(),

            total_messages_sent: c.total_messages_sent.sum(),
            total_errors: c.total_errors.sum(),
            total_messages_received: c.total_messages_received.sum(),

            publish_latency: self.publish.interval.snapshot_and_reset(),
            publish_delay_latency: self.publish_delay.interval.snapshot_and_reset(),
            schedule_latency: self.schedule.interval.snapshot_and_reset(),
            end_to_end_latency: self.end_to_end.interval.snapshot_and_reset(),
        }
    }

    pub fn cumulative_latencies(&self) -> CumulativeLatencies {
        CumulativeLatencies {
            publish_latency: self.publish.cumulative.snapshot(),
            publish_delay_latency: self.publish_delay.cumulative.snapshot(),
            schedule_latency: self.schedule.cumulative.snapshot(),
            end_to_end_latency: self.end_to_end.cumulative.snapshot(),
        }
    }

    pub fn counters_stats(&self) -> CountersStats {
        CountersStats {
            messages_sent: self.counters.total_messages_sent.sum(),
            messages_received: self.counters.total_messages_received.sum(),
        }
    }

    /// `reset_stats`: clears session counters and every recorder, interval
    /// and cumulative alike. Totals survive.
    pub fn reset(&self) {
        self.counters.reset_session();
        self.reset_recorders();
    }

    /// `stop_all`: clears absolutely everything, totals included.
    pub fn reset_all(&self) {
        self.counters.reset_all();
        self.reset_recorders();
    }

    fn reset_recorders(&self) {
        self.publish.reset();
        self.publish_delay.reset();
        self.schedule.reset();
        self.end_to_end.reset();
    }
}
