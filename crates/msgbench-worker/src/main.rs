//!
//! # Standalone benchmark worker
//!
//! Drives a full worker lifecycle against the in-process loopback driver:
//! initialize, create topics, producers and consumers, probe, generate load
//! at the requested rate, and log period statistics until the duration
//! elapses or Ctrl-C arrives. The coordinator RPC surface is not wired here;
//! this binary exists to exercise and demonstrate the measurement core.
//!

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Relaxed, Release};
use std::time::{Duration, Instant};

use clap::Parser;
use hdrhistogram::Histogram;
use msgbench_driver::DriverConfiguration;
use msgbench_worker::args::Args;
use msgbench_worker::engine::ProducerWorkAssignment;
use msgbench_worker::error::WorkerError;
use msgbench_worker::stats::PeriodStats;
use msgbench_worker::worker::{BenchmarkWorker, ConsumerAssignment, TopicSubscription, TopicsInfo};
use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter};

/// Global flag cleared when the benchmark should wind down.
static KEEP_RUNNING: AtomicBool = AtomicBool::new(true);

fn main() {
    set_ctrlc_handler();

    let args = Args::parse();
    enable_logging(&args);
    debug!("{args:?}");

    if let Err(e) = run(&args) {
        error!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), WorkerError> {
    let mut worker = BenchmarkWorker::with_defaults();

    let config = DriverConfiguration::from_json(r#"{"driverClass": "loopback"}"#)
        .map_err(WorkerError::from)?;
    worker.initialize_driver(&config)?;

    let topics = worker.create_or_validate_topics(&TopicsInfo::Create {
        number_of_topics: args.topics,
        partitions_per_topic: args.partitions,
    })?;
    worker.create_producers(&topics)?;

    let assignment = ConsumerAssignment {
        topics_subscriptions: topics
            .iter()
            .map(|topic| TopicSubscription {
                topic: topic.clone(),
                subscription: "sub-001".to_string(),
            })
            .collect(),
    };
    worker.create_consumers(&assignment)?;
    worker.probe_producers()?;

    worker.start_load(&ProducerWorkAssignment {
        publish_rate: args.rate,
        key_distributor_type: args.key_distributor.into(),
        payload_data: vec![vec![0u8; args.payload_size]],
    })?;

    run_reporting_loop(&worker, args);

    report_cumulative(&worker);
    worker.stop_all();

    info!("Benchmark finished");
    Ok(())
}

fn run_reporting_loop(worker: &BenchmarkWorker, args: &Args) {
    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let report_interval = Duration::from_secs(args.stats_interval.max(1));
    let mut last_report = Instant::now();

    while Instant::now() < deadline && KEEP_RUNNING.load(Relaxed) {
        std::thread::sleep(Duration::from_millis(100));

        if last_report.elapsed() >= report_interval {
            let elapsed = last_report.elapsed().as_secs_f64();
            report_period(&worker.period_stats(), elapsed);
            last_report = Instant::now();
        }
    }
}

fn report_period(period: &PeriodStats, elapsed_secs: f64) {
    let elapsed = elapsed_secs.max(f64::EPSILON);

    info!(
        "Pub rate {:7.1} msg/s / {:5.2} MB/s | Cons rate {:7.1} msg/s | errors={} poll_errors={}",
        period.messages_sent as f64 / elapsed,
        period.bytes_sent as f64 / (1024.0 * 1024.0) / elapsed,
        period.messages_received as f64 / elapsed,
        period.errors,
        period.poll_errors,
    );
    info!(
        "Pub latency (ms) {} | Pub delay (ms) {} | E2E (ms) {}",
        format_percentiles(&period.publish_latency),
        format_percentiles(&period.publish_delay_latency),
        format_percentiles(&period.end_to_end_latency),
    );
}

fn report_cumulative(worker: &BenchmarkWorker) {
    let totals = worker.counters_stats();
    let latencies = worker.cumulative_latencies();

    info!(
        "Total sent={} received={}",
        totals.messages_sent, totals.messages_received
    );
    info!(
        "Cumulative pub latency (ms) {} | pub delay (ms) {} | E2E (ms) {}",
        format_percentiles(&latencies.publish_latency),
        format_percentiles(&latencies.publish_delay_latency),
        format_percentiles(&latencies.end_to_end_latency),
    );
}

fn format_percentiles(histogram: &Histogram<u64>) -> String {
    if histogram.is_empty() {
        return "n/a".to_string();
    }

    let ms = |us: u64| us as f64 / 1_000.0;
    format!(
        "p50={:.3} p99={:.3} p999={:.3} max={:.3}",
        ms(histogram.value_at_quantile(0.5)),
        ms(histogram.value_at_quantile(0.99)),
        ms(histogram.value_at_quantile(0.999)),
        ms(histogram.max()),
    )
}

fn set_ctrlc_handler() {
    ctrlc::set_handler(|| {
        info!("Received Ctrl-C, exiting...");
        KEEP_RUNNING.store(false, Release);
    })
    .expect("Error setting Ctrl-C handler");
}

fn enable_logging(args: &Args) {
    let verbosity = if args.quiet {
        tracing::Level::ERROR
    } else {
        match args.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            2.. => tracing::Level::TRACE,
        }
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_filter(filter::LevelFilter::from_level(verbosity));

    tracing_subscriber::registry().with(fmt_layer).init();
}
