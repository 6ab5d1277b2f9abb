//! The contract between the msgbench worker and broker-specific drivers:
//! producer/consumer factories, the message callback delivered to consumers,
//! the driver registry, and the metrics sink hierarchy drivers report into.

#![forbid(unsafe_code)]

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod loopback;
pub mod registry;
pub mod sink;
pub mod time;

pub use config::DriverConfiguration;
pub use error::DriverError;
pub use registry::DriverRegistry;
pub use sink::{MetricsSink, NoopSink};
pub use time::ClockSource;

/// Invoked by the driver on its I/O completion thread once a send is
/// acknowledged (or has failed). Captures whatever state the caller needs
/// carried from submission to completion.
pub type SendCompletion = Box<dyn FnOnce(Result<(), DriverError>) + Send + 'static>;

/// A broker-specific driver. Created through a [`DriverRegistry`] factory,
/// which passes the driver its configuration document and a metrics sink.
pub trait Driver: Send + Sync {
    /// Prefix used when the worker generates topic names for this driver.
    fn topic_name_prefix(&self) -> String;

    fn create_topic(&self, name: &str, partitions: u32) -> Result<(), DriverError>;

    fn validate_topic_exists(&self, name: &str) -> Result<bool, DriverError>;

    fn create_producer(&self, topic: &str) -> Result<Arc<dyn Producer>, DriverError>;

    fn create_consumer(
        &self,
        topic: &str,
        subscription: &str,
        callback: Arc<dyn MessageCallback>,
    ) -> Result<Arc<dyn Consumer>, DriverError>;

    /// Releases broker connections. Producers and consumers created by this
    /// driver must already be closed.
    fn close(&self);
}

/// A producer bound to a single topic.
pub trait Producer: Send + Sync {
    /// Submits one message and returns without waiting for the broker.
    /// `completion` runs exactly once, on whatever thread the driver uses
    /// for I/O completion.
    fn send_async(&self, key: Option<&str>, payload: &[u8], completion: SendCompletion);

    fn close(&self);
}

/// A consumer subscription handle. Messages arrive through the
/// [`MessageCallback`] given to [`Driver::create_consumer`].
pub trait Consumer: Send + Sync {
    fn close(&self);
}

/// Receives messages on driver delivery threads.
///
/// Drivers that know the broker-assigned publish timestamp call
/// [`message_received`](MessageCallback::message_received); drivers that
/// compute the end-to-end latency themselves call
/// [`message_received_with_latency`](MessageCallback::message_received_with_latency).
pub trait MessageCallback: Send + Sync {
    /// A message with its publish timestamp in wall-clock milliseconds.
    /// The payload slice is only valid for the duration of the call.
    fn message_received(&self, payload: &[u8], publish_timestamp_ms: u64);

    /// A message for which the driver already computed the end-to-end
    /// latency in nanoseconds. May be negative under clock skew.
    fn message_received_with_latency(&self, payload_size: u64, e2e_latency_ns: i64);

    /// A delivery failure inside the driver's poll loop.
    fn receive_error(&self);
}
