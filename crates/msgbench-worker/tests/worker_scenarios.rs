//! End-to-end scenarios against the loopback driver: a full worker
//! lifecycle, rate accuracy, error accounting, rate adjustment, and the
//! interval/cumulative tiling property. Timing assertions use generous
//! windows so loaded CI machines do not flake.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Release;
use std::time::Duration;

use msgbench_driver::{ClockSource, DriverConfiguration, Producer, SendCompletion};
use msgbench_worker::engine::{LoadEngine, ProducerWorkAssignment};
use msgbench_worker::keys::{KeyDistributor, KeyDistributorType};
use msgbench_worker::rate::{RateLimiterHandle, UniformRateLimiter};
use msgbench_worker::stats::WorkerStats;
use msgbench_worker::worker::{BenchmarkWorker, ConsumerAssignment, TopicSubscription, TopicsInfo};

fn loopback_config(extra: &str) -> DriverConfiguration {
    let document = if extra.is_empty() {
        r#"{"driverClass": "loopback"}"#.to_string()
    } else {
        format!(r#"{{"driverClass": "loopback", {extra}}}"#)
    };
    DriverConfiguration::from_json(&document).unwrap()
}

/// Initializes a worker, creates `topics` topics with a producer and a
/// consumer each, and probes.
fn ready_worker(config: &DriverConfiguration, topics: u32) -> BenchmarkWorker {
    let mut worker = BenchmarkWorker::with_defaults();
    worker.initialize_driver(config).unwrap();

    let names = worker
        .create_or_validate_topics(&TopicsInfo::Create {
            number_of_topics: topics,
            partitions_per_topic: 1,
        })
        .unwrap();
    worker.create_producers(&names).unwrap();

    let assignment = ConsumerAssignment {
        topics_subscriptions: names
            .iter()
            .map(|topic| TopicSubscription {
                topic: topic.clone(),
                subscription: "sub-001".to_string(),
            })
            .collect(),
    };
    worker.create_consumers(&assignment).unwrap();

    worker
}

fn assignment(rate: f64) -> ProducerWorkAssignment {
    ProducerWorkAssignment {
        publish_rate: rate,
        key_distributor_type: KeyDistributorType::NoKey,
        payload_data: vec![vec![7u8; 64]],
    }
}

#[test]
fn load_run_hits_the_target_rate() {
    let mut worker = ready_worker(&loopback_config(""), 1);

    worker.start_load(&assignment(1_000.0)).unwrap();
    std::thread::sleep(Duration::from_secs(2));

    let sent = worker.counters_stats().messages_sent;
    worker.stop_all();

    // Open-loop pacing holds the aggregate close to rate * duration.
    assert!(
        (1_600..=2_400).contains(&sent),
        "expected ~2000 sends in 2s at 1000 msg/s, got {sent}"
    );
}

#[test]
fn consumers_observe_the_published_traffic() {
    let mut worker = ready_worker(&loopback_config(""), 2);

    worker.start_load(&assignment(500.0)).unwrap();
    std::thread::sleep(Duration::from_millis(1_500));

    let period = worker.period_stats();
    worker.stop_all();

    assert!(period.messages_sent > 100, "sent {}", period.messages_sent);
    // Each topic has one consumer; loopback fans out per topic.
    assert!(
        period.messages_received > 100,
        "received {}",
        period.messages_received
    );
    assert_eq!(period.bytes_received % 64, 0);
    assert!(period.end_to_end_latency.len() > 0);
    assert!(period.publish_latency.len() > 0);
    assert!(period.publish_delay_latency.len() > 0);
    assert!(period.schedule_latency.len() > 0);
}

#[test]
fn injected_send_failures_are_accounted() {
    let mut worker = ready_worker(&loopback_config(r#""failEvery": 10"#), 1);

    worker.start_load(&assignment(500.0)).unwrap();
    std::thread::sleep(Duration::from_secs(2));

    let period = worker.period_stats();
    worker.stop_all();

    let attempts = period.messages_sent + period.errors;
    assert!(attempts > 500, "attempts {attempts}");
    assert_eq!(period.total_errors, period.errors);

    // Every 10th send fails, so errors track attempts / 10.
    let expected = attempts / 10;
    let slack = expected / 2 + 5;
    assert!(
        period.errors >= expected - slack && period.errors <= expected + slack,
        "expected ~{expected} errors out of {attempts} attempts, got {}",
        period.errors
    );
}

#[test]
fn rate_adjustment_converges_on_the_new_rate() {
    let mut worker = ready_worker(&loopback_config(""), 1);

    worker.start_load(&assignment(100.0)).unwrap();
    std::thread::sleep(Duration::from_secs(1));
    let low_window = worker.period_stats().messages_sent;

    worker.adjust_publish_rate(1_000.0);
    std::thread::sleep(Duration::from_secs(1));
    let high_window = worker.period_stats().messages_sent;

    worker.stop_all();

    assert!(
        (50..=200).contains(&low_window),
        "low window sent {low_window}"
    );
    assert!(
        high_window >= low_window * 3,
        "rate bump did not take: {low_window} -> {high_window}"
    );
}

#[test]
fn period_counts_sum_to_the_final_totals() {
    let mut worker = ready_worker(&loopback_config(""), 1);

    worker.start_load(&assignment(800.0)).unwrap();

    let mut summed = 0;
    for _ in 0..4 {
        std::thread::sleep(Duration::from_millis(400));
        summed += worker.period_stats().messages_sent;
    }

    // Let in-flight completions land, then drain the last window.
    worker.adjust_publish_rate(1.0);
    std::thread::sleep(Duration::from_millis(300));
    let last = worker.period_stats();
    summed += last.messages_sent;

    let total = last.total_messages_sent;
    worker.stop_all();

    assert!(summed > 0);
    // A completion can land between the counter drain and the totals read
    // inside one snapshot; the gap is bounded by in-flight sends.
    assert!(summed <= total && total - summed <= 3, "{summed} vs {total}");
}

// The tiling property at the engine level, where the completion flag gives
// exact control: after every task has joined, the union of all interval
// snapshots must equal the cumulative histogram.
#[test]
fn interval_snapshots_tile_the_cumulative_histogram() {
    struct NoopProducer;

    impl Producer for NoopProducer {
        fn send_async(&self, _key: Option<&str>, _payload: &[u8], completion: SendCompletion) {
            completion(Ok(()));
        }

        fn close(&self) {}
    }

    let clock = ClockSource::System;
    let stats = Arc::new(WorkerStats::with_noop_sink());
    let rate = Arc::new(RateLimiterHandle::new(UniformRateLimiter::new(
        2_000.0, &clock,
    )));
    let test_completed = Arc::new(AtomicBool::new(false));

    let producers: Vec<Arc<dyn Producer>> = vec![Arc::new(NoopProducer)];
    let engine = LoadEngine::start(
        &producers,
        vec![vec![0u8; 32]],
        KeyDistributor::build(KeyDistributorType::NoKey),
        stats.clone(),
        rate,
        test_completed.clone(),
        clock,
    );

    let mut interval_total = 0;
    for _ in 0..3 {
        std::thread::sleep(Duration::from_millis(200));
        interval_total += stats.period_stats().publish_latency.len();
    }

    test_completed.store(true, Release);
    engine.join();

    interval_total += stats.period_stats().publish_latency.len();
    let cumulative = stats.cumulative_latencies().publish_latency.len();

    assert!(cumulative > 0);
    assert_eq!(interval_total, cumulative);
}

#[test]
fn stopped_worker_runs_a_second_test_cleanly() {
    let config = loopback_config("");
    let mut worker = ready_worker(&config, 1);

    worker.start_load(&assignment(500.0)).unwrap();
    std::thread::sleep(Duration::from_millis(500));
    worker.stop_all();

    assert_eq!(worker.counters_stats().messages_sent, 0);

    // Full second lifecycle on the same worker instance.
    worker.initialize_driver(&config).unwrap();
    let names = worker
        .create_or_validate_topics(&TopicsInfo::Create {
            number_of_topics: 1,
            partitions_per_topic: 1,
        })
        .unwrap();
    worker.create_producers(&names).unwrap();
    worker.start_load(&assignment(500.0)).unwrap();
    std::thread::sleep(Duration::from_millis(500));

    assert!(worker.counters_stats().messages_sent > 0);
    worker.stop_all();
}
