//! The producer load engine: fans producer-driving tasks out across cores
//! and runs the paced hot send loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Acquire;
use std::thread::JoinHandle;

use msgbench_driver::{ClockSource, Producer};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::keys::{KeyDistributor, KeyDistributorType};
use crate::rate::{CachedLimiter, RateLimiterHandle, sleep_until};
use crate::stats::WorkerStats;

/// What a coordinator asks the producers to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerWorkAssignment {
    #[serde(rename = "publishRate")]
    pub publish_rate: f64,

    #[serde(rename = "keyDistributorType", default)]
    pub key_distributor_type: KeyDistributorType,

    /// Candidate payloads; each send picks one uniformly at random.
    #[serde(rename = "payloadData")]
    pub payload_data: Vec<Vec<u8>>,
}

/// Running load tasks. Dropping the engine does not stop them; the owner
/// sets the completion flag and then calls [`join`](LoadEngine::join).
pub struct LoadEngine {
    handles: Vec<JoinHandle<()>>,
}

impl LoadEngine {
    /// Partitions `producers` round-robin into `min(cores, P)` groups and
    /// spawns one load task per group. All tasks pace against the shared
    /// `rate` handle, so the aggregate send rate matches the assignment
    /// regardless of how producers are spread.
    pub fn start(
        producers: &[Arc<dyn Producer>],
        payloads: Vec<Vec<u8>>,
        key_distributor: KeyDistributor,
        stats: Arc<WorkerStats>,
        rate: Arc<RateLimiterHandle>,
        test_completed: Arc<AtomicBool>,
        clock: ClockSource,
    ) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let groups = partition_round_robin(producers, cores);
        let payloads = Arc::new(payloads);
        let key_distributor = Arc::new(key_distributor);

        debug!(
            "starting load: {} producers across {} tasks",
            producers.len(),
            groups.len()
        );

        let handles = groups
            .into_iter()
            .enumerate()
            .map(|(i, group)| {
                let payloads = payloads.clone();
                let key_distributor = key_distributor.clone();
                let stats = stats.clone();
                let limiter = CachedLimiter::new(rate.clone());
                let test_completed = test_completed.clone();
                let clock = clock.clone();

                std::thread::Builder::new()
                    .name(format!("load-{i}"))
                    .spawn(move || {
                        let result = catch_unwind(AssertUnwindSafe(|| {
                            run_group(
                                &group,
                                &payloads,
                                &key_distributor,
                                &stats,
                                limiter,
                                &test_completed,
                                &clock,
                            )
                        }));

                        if result.is_err() {
                            error!("load task {i} panicked; remaining tasks keep running");
                        }
                    })
                    .expect("failed to spawn load task")
            })
            .collect();

        Self { handles }
    }

    /// Waits for every load task to observe the completion flag and exit.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn partition_round_robin(
    producers: &[Arc<dyn Producer>],
    max_groups: usize,
) -> Vec<Vec<Arc<dyn Producer>>> {
    let num_groups = max_groups.min(producers.len());
    let mut groups: Vec<Vec<Arc<dyn Producer>>> = vec![Vec::new(); num_groups];

    for (i, producer) in producers.iter().enumerate() {
        groups[i % num_groups].push(producer.clone());
    }

    groups
}

/// The hot send loop of one task. Producers within a group are driven
/// sequentially so a slow one throttles only its own task; the shared rate
/// limiter keeps the aggregate schedule intact across tasks.
fn run_group(
    group: &[Arc<dyn Producer>],
    payloads: &Arc<Vec<Vec<u8>>>,
    key_distributor: &KeyDistributor,
    stats: &Arc<WorkerStats>,
    mut limiter: CachedLimiter,
    test_completed: &AtomicBool,
    clock: &ClockSource,
) {
    while !test_completed.load(Acquire) {
        for producer in group {
            let payload = if payloads.len() > 1 {
                &payloads[fastrand::usize(..payloads.len())]
            } else {
                &payloads[0]
            };

            let intended_ns = limiter.acquire();
            if !sleep_until(clock, intended_ns, test_completed) {
                return;
            }

            let send_ns = clock.monotonic_ns();
            let key = key_distributor.next();

            let completion = {
                let stats = stats.clone();
                let clock = clock.clone();
                let payload_len = payload.len() as u64;

                Box::new(move |result: Result<(), msgbench_driver::DriverError>| match result {
                    Ok(()) => {
                        let now_ns = clock.monotonic_ns();
                        stats.record_message_sent(
                            payload_len,
                            now_ns.saturating_sub(send_ns) / 1_000,
                            send_ns.saturating_sub(intended_ns) / 1_000,
                        );
                    }
                    Err(e) => {
                        stats.record_send_error();
                        warn!("send failed: {e}");
                    }
                })
            };

            producer.send_async(key.as_deref(), payload, completion);
            stats.record_schedule_latency(clock.monotonic_ns().saturating_sub(send_ns) / 1_000);
        }
    }
}
