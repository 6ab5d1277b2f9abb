//! Worker control: the lifecycle operations a coordinator drives, from
//! driver initialization through load generation to teardown.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Release;
use std::time::Duration;

use crossbeam_channel::bounded;
use msgbench_driver::{
    ClockSource, Consumer, Driver, DriverConfiguration, DriverError, DriverRegistry, MetricsSink,
    NoopSink, Producer,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::{LoadEngine, ProducerWorkAssignment};
use crate::error::WorkerError;
use crate::ingest::ConsumerIngest;
use crate::keys::KeyDistributor;
use crate::rate::{RateLimiterHandle, UniformRateLimiter};
use crate::stats::{CountersStats, CumulativeLatencies, PeriodStats, WorkerStats};

/// Topics to drive: reuse an existing set or create fresh ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TopicsInfo {
    #[serde(rename = "existing")]
    Existing(Vec<String>),

    #[serde(rename = "create")]
    Create {
        #[serde(rename = "numberOfTopics")]
        number_of_topics: u32,
        #[serde(rename = "partitionsPerTopic")]
        partitions_per_topic: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSubscription {
    pub topic: String,
    pub subscription: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerAssignment {
    #[serde(rename = "topicsSubscriptions")]
    pub topics_subscriptions: Vec<TopicSubscription>,
}

const PROBE_KEY: &str = "key";
const PROBE_PAYLOAD: &[u8; 24] = b"msgbench-producer-probe!";
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lets in-flight completions land before producers are torn down.
const STOP_DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// The singleton coordinating a benchmark run on this machine. All state
/// lives here; operations arrive from a coordinator one at a time, while
/// the stats snapshot methods may be polled concurrently.
pub struct BenchmarkWorker {
    registry: DriverRegistry,
    sink: Arc<dyn MetricsSink>,
    clock: ClockSource,

    driver: Option<Arc<dyn Driver>>,
    producers: Vec<Arc<dyn Producer>>,
    consumers: Vec<Arc<dyn Consumer>>,

    stats: Arc<WorkerStats>,
    rate: Arc<RateLimiterHandle>,
    engine: Option<LoadEngine>,

    test_completed: Arc<AtomicBool>,
    consumers_paused: Arc<AtomicBool>,
}

impl BenchmarkWorker {
    pub fn new(registry: DriverRegistry, sink: Arc<dyn MetricsSink>, clock: ClockSource) -> Self {
        let stats = Arc::new(WorkerStats::new(sink.as_ref()));
        let rate = Arc::new(RateLimiterHandle::new(UniformRateLimiter::new(
            1.0, &clock,
        )));

        Self {
            registry,
            sink,
            clock,
            driver: None,
            producers: Vec::new(),
            consumers: Vec::new(),
            stats,
            rate,
            engine: None,
            test_completed: Arc::new(AtomicBool::new(false)),
            consumers_paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A worker with the built-in driver registry and no metrics exporter.
    pub fn with_defaults() -> Self {
        Self::new(
            DriverRegistry::with_builtins(),
            Arc::new(NoopSink),
            ClockSource::System,
        )
    }

    fn driver(&self) -> Result<&Arc<dyn Driver>, WorkerError> {
        self.driver.as_ref().ok_or(WorkerError::DriverNotInitialized)
    }

    pub fn initialize_driver(&mut self, config: &DriverConfiguration) -> Result<(), WorkerError> {
        if self.driver.is_some() {
            return Err(WorkerError::DriverAlreadyInitialized);
        }

        let driver = self.registry.create(config, self.sink.clone())?;
        info!("initialized driver '{}'", config.driver_class);
        self.driver = Some(driver);
        Ok(())
    }

    /// Validates the given topics, or creates fresh ones named
    /// `{prefix}-{random8}-{index:04}`. Returns the topics to drive.
    pub fn create_or_validate_topics(
        &mut self,
        info: &TopicsInfo,
    ) -> Result<Vec<String>, WorkerError> {
        let driver = self.driver()?;

        match info {
            TopicsInfo::Existing(names) => {
                for name in names {
                    if !driver.validate_topic_exists(name)? {
                        return Err(DriverError::NoSuchTopic(name.clone()).into());
                    }
                }
                info!("validated {} existing topics", names.len());
                Ok(names.clone())
            }
            TopicsInfo::Create {
                number_of_topics,
                partitions_per_topic,
            } => {
                let prefix = driver.topic_name_prefix();
                let mut names = Vec::with_capacity(*number_of_topics as usize);

                for i in 0..*number_of_topics {
                    let suffix: String = (0..8).map(|_| fastrand::alphanumeric()).collect();
                    let name = format!("{prefix}-{suffix}-{i:04}");
                    driver.create_topic(&name, *partitions_per_topic)?;
                    names.push(name);
                }

                info!(
                    "created {} topics with {} partitions each",
                    number_of_topics, partitions_per_topic
                );
                Ok(names)
            }
        }
    }

    /// One producer per topic, in the supplied order.
    pub fn create_producers(&mut self, topics: &[String]) -> Result<(), WorkerError> {
        let driver = self.driver()?;

        let mut producers = Vec::with_capacity(topics.len());
        for topic in topics {
            producers.push(driver.create_producer(topic)?);
        }

        info!("created {} producers", producers.len());
        self.producers.extend(producers);
        Ok(())
    }

    /// One consumer per `(topic, subscription)` pair, all feeding the same
    /// ingest path.
    pub fn create_consumers(&mut self, assignment: &ConsumerAssignment) -> Result<(), WorkerError> {
        let driver = self.driver()?;

        let mut consumers = Vec::with_capacity(assignment.topics_subscriptions.len());
        for pair in &assignment.topics_subscriptions {
            let ingest = Arc::new(ConsumerIngest::new(
                self.stats.clone(),
                self.clock.clone(),
                self.consumers_paused.clone(),
                self.test_completed.clone(),
            ));
            consumers.push(driver.create_consumer(&pair.topic, &pair.subscription, ingest)?);
        }

        info!("created {} consumers", consumers.len());
        self.consumers.extend(consumers);
        Ok(())
    }

    /// Sends one fixed payload through every producer to warm up and verify
    /// reachability. Successful probes move only the sent total.
    pub fn probe_producers(&self) -> Result<(), WorkerError> {
        let (tx, rx) = bounded(self.producers.len());

        for producer in &self.producers {
            let tx = tx.clone();
            producer.send_async(
                Some(PROBE_KEY),
                PROBE_PAYLOAD,
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            );
        }

        for _ in 0..self.producers.len() {
            match rx.recv_timeout(PROBE_TIMEOUT) {
                Ok(Ok(())) => self.stats.record_probe_sent(),
                Ok(Err(e)) => return Err(WorkerError::ProbeFailed(e.to_string())),
                Err(_) => {
                    return Err(WorkerError::ProbeFailed(
                        "timed out waiting for send acknowledgement".to_string(),
                    ));
                }
            }
        }

        info!("probed {} producers", self.producers.len());
        Ok(())
    }

    /// Configures the rate limiter and fans the load tasks out over the
    /// producers created so far.
    pub fn start_load(&mut self, assignment: &ProducerWorkAssignment) -> Result<(), WorkerError> {
        self.driver()?;

        if assignment.payload_data.is_empty() {
            return Err(WorkerError::InvalidAssignment(
                "payload_data must contain at least one payload".to_string(),
            ));
        }
        if self.engine.is_some() {
            return Err(WorkerError::LoadAlreadyRunning);
        }

        self.test_completed.store(false, Release);
        self.rate
            .replace(UniformRateLimiter::new(assignment.publish_rate, &self.clock));

        let engine = LoadEngine::start(
            &self.producers,
            assignment.payload_data.clone(),
            KeyDistributor::build(assignment.key_distributor_type),
            self.stats.clone(),
            self.rate.clone(),
            self.test_completed.clone(),
            self.clock.clone(),
        );
        self.engine = Some(engine);

        info!(
            "load started: {} msg/s over {} producers",
            self.rate.current().rate(),
            self.producers.len()
        );
        Ok(())
    }

    /// Swaps the rate limiter; running tasks see the change at their next
    /// acquire. Rates below 1.0 msg/s are clamped.
    pub fn adjust_publish_rate(&self, rate: f64) {
        self.rate
            .replace(UniformRateLimiter::new(rate, &self.clock));
        info!("publish rate adjusted to {} msg/s", self.rate.current().rate());
    }

    pub fn pause_consumers(&self) {
        self.consumers_paused.store(true, Release);
        info!("consumers paused");
    }

    pub fn resume_consumers(&self) {
        self.consumers_paused.store(false, Release);
        info!("consumers resumed");
    }

    pub fn period_stats(&self) -> PeriodStats {
        self.stats.period_stats()
    }

    pub fn cumulative_latencies(&self) -> CumulativeLatencies {
        self.stats.cumulative_latencies()
    }

    pub fn counters_stats(&self) -> CountersStats {
        self.stats.counters_stats()
    }

    /// Clears histograms and session counters; totals keep accumulating.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Current aggregate publish rate, post-clamping.
    pub fn publish_rate(&self) -> f64 {
        self.rate.current().rate()
    }

    /// Stops load generation and tears everything down: completion flag,
    /// unpause, full stats reset (totals included), a short drain for
    /// in-flight sends, then producers, consumers, and driver in that
    /// order. Safe to call repeatedly; the worker ends uninitialized.
    pub fn stop_all(&mut self) {
        info!("stopping worker");

        self.test_completed.store(true, Release);
        self.consumers_paused.store(false, Release);

        if let Some(engine) = self.engine.take() {
            engine.join();
        }

        self.stats.reset_all();
        std::thread::sleep(STOP_DRAIN_INTERVAL);

        for producer in self.producers.drain(..) {
            producer.close();
        }
        for consumer in self.consumers.drain(..) {
            consumer.close();
        }
        if let Some(driver) = self.driver.take() {
            driver.close();
        } else {
            warn!("stop_all on an uninitialized worker; nothing to close");
        }

        info!("worker stopped");
    }

    pub fn close(&mut self) {
        self.stop_all();
    }
}
