//! An in-process driver with no broker behind it. Publishes flow through a
//! bounded channel to a dispatcher thread that acknowledges the send and
//! fans the message out to subscribed consumers, so producer back-pressure
//! and consumer pause behave like a real client library's buffer.
//!
//! Configuration parameters (all optional):
//! - `ackDelayMicros`: hold each acknowledgement this long in the dispatcher
//! - `blockSendMicros`: stall synchronously inside `send_async`
//! - `failEvery`: every Nth send completes with an error

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::debug;

use crate::config::DriverConfiguration;
use crate::error::DriverError;
use crate::sink::{MetricsSink, SinkCounter};
use crate::time::ClockSource;
use crate::{Consumer, Driver, MessageCallback, Producer, SendCompletion};

pub const DRIVER_NAME: &str = "loopback";

const QUEUE_DEPTH: usize = 8_192;

#[derive(Debug, Clone, Default)]
pub struct LoopbackOptions {
    /// Dispatcher holds each acknowledgement this long.
    pub ack_delay: Duration,
    /// `send_async` stalls the calling thread this long before enqueueing.
    pub block_send: Duration,
    /// Every Nth send fails. Zero disables injection.
    pub fail_every: u64,
}

impl LoopbackOptions {
    fn from_config(config: &DriverConfiguration) -> Result<Self, DriverError> {
        let micros = |v: Option<u64>| Duration::from_micros(v.unwrap_or(0));

        Ok(Self {
            ack_delay: micros(config.param_u64("ackDelayMicros")?),
            block_send: micros(config.param_u64("blockSendMicros")?),
            fail_every: config.param_u64("failEvery")?.unwrap_or(0),
        })
    }
}

/// Registry factory for the loopback driver.
pub fn factory(
    config: &DriverConfiguration,
    sink: Arc<dyn MetricsSink>,
) -> Result<Arc<dyn Driver>, DriverError> {
    let options = LoopbackOptions::from_config(config)?;
    Ok(Arc::new(LoopbackDriver::with_options(
        options,
        ClockSource::System,
        sink,
    )))
}

enum Dispatch {
    Publish {
        topic: String,
        payload: Vec<u8>,
        publish_ts_ms: u64,
        completion: SendCompletion,
    },
    Shutdown,
}

type SubscriberMap = HashMap<String, Vec<(u64, Arc<dyn MessageCallback>)>>;

struct Inner {
    clock: ClockSource,
    options: LoopbackOptions,
    topics: Mutex<HashSet<String>>,
    subscribers: Mutex<SubscriberMap>,
    tx: Sender<Dispatch>,
    send_seq: AtomicU64,
    next_consumer_id: AtomicU64,
    closed: AtomicBool,
}

pub struct LoopbackDriver {
    inner: Arc<Inner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackDriver {
    pub fn with_options(
        options: LoopbackOptions,
        clock: ClockSource,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let (tx, rx) = bounded(QUEUE_DEPTH);

        let inner = Arc::new(Inner {
            clock,
            options,
            topics: Mutex::new(HashSet::new()),
            subscribers: Mutex::new(HashMap::new()),
            tx,
            send_seq: AtomicU64::new(0),
            next_consumer_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let dispatched = sink.scope(DRIVER_NAME).counter("messages_dispatched");
        let dispatcher = {
            let inner = inner.clone();
            std::thread::Builder::new()
                .name("loopback-dispatch".to_string())
                .spawn(move || dispatch_loop(inner, rx, dispatched))
                .expect("failed to spawn loopback dispatcher")
        };

        Self {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    fn require_topic(&self, name: &str) -> Result<(), DriverError> {
        if self.inner.topics.lock().unwrap().contains(name) {
            Ok(())
        } else {
            Err(DriverError::NoSuchTopic(name.to_string()))
        }
    }
}

fn dispatch_loop(inner: Arc<Inner>, rx: Receiver<Dispatch>, dispatched: Arc<dyn SinkCounter>) {
    while let Ok(message) = rx.recv() {
        match message {
            Dispatch::Publish {
                topic,
                payload,
                publish_ts_ms,
                completion,
            } => {
                if !inner.options.ack_delay.is_zero() {
                    std::thread::sleep(inner.options.ack_delay);
                }
                completion(Ok(()));
                dispatched.inc();

                let callbacks: Vec<Arc<dyn MessageCallback>> = inner
                    .subscribers
                    .lock()
                    .unwrap()
                    .get(&topic)
                    .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                    .unwrap_or_default();

                for callback in callbacks {
                    callback.message_received(&payload, publish_ts_ms);
                }
            }
            Dispatch::Shutdown => break,
        }
    }

    debug!("loopback dispatcher exiting");
}

impl Driver for LoopbackDriver {
    fn topic_name_prefix(&self) -> String {
        DRIVER_NAME.to_string()
    }

    fn create_topic(&self, name: &str, _partitions: u32) -> Result<(), DriverError> {
        self.inner.topics.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    fn validate_topic_exists(&self, name: &str) -> Result<bool, DriverError> {
        Ok(self.inner.topics.lock().unwrap().contains(name))
    }

    fn create_producer(&self, topic: &str) -> Result<Arc<dyn Producer>, DriverError> {
        self.require_topic(topic)?;

        Ok(Arc::new(LoopbackProducer {
            inner: self.inner.clone(),
            topic: topic.to_string(),
        }))
    }

    fn create_consumer(
        &self,
        topic: &str,
        subscription: &str,
        callback: Arc<dyn MessageCallback>,
    ) -> Result<Arc<dyn Consumer>, DriverError> {
        self.require_topic(topic)?;

        let id = self.inner.next_consumer_id.fetch_add(1, Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push((id, callback));

        debug!("loopback consumer {id} subscribed to {topic} as {subscription}");

        Ok(Arc::new(LoopbackConsumer {
            inner: self.inner.clone(),
            topic: topic.to_string(),
            id,
        }))
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Relaxed) {
            return;
        }

        let _ = self.inner.tx.send(Dispatch::Shutdown);
        if let Some(handle) = self.dispatcher.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.inner.subscribers.lock().unwrap().clear();
    }
}

struct LoopbackProducer {
    inner: Arc<Inner>,
    topic: String,
}

impl Producer for LoopbackProducer {
    fn send_async(&self, _key: Option<&str>, payload: &[u8], completion: SendCompletion) {
        if self.inner.closed.load(Relaxed) {
            completion(Err(DriverError::Closed));
            return;
        }

        if !self.inner.options.block_send.is_zero() {
            std::thread::sleep(self.inner.options.block_send);
        }

        let seq = self.inner.send_seq.fetch_add(1, Relaxed) + 1;
        let fail_every = self.inner.options.fail_every;
        if fail_every > 0 && seq % fail_every == 0 {
            completion(Err(DriverError::SendFailed(format!(
                "injected failure on send {seq}"
            ))));
            return;
        }

        let publish = Dispatch::Publish {
            topic: self.topic.clone(),
            payload: payload.to_vec(),
            publish_ts_ms: self.inner.clock.epoch_millis(),
            completion,
        };

        // Blocking send: a full dispatcher queue is the loopback analog of a
        // client library's exhausted in-flight buffer.
        if let Err(rejected) = self.inner.tx.send(publish) {
            if let Dispatch::Publish { completion, .. } = rejected.0 {
                completion(Err(DriverError::Closed));
            }
        }
    }

    fn close(&self) {}
}

struct LoopbackConsumer {
    inner: Arc<Inner>,
    topic: String,
    id: u64,
}

impl Consumer for LoopbackConsumer {
    fn close(&self) {
        if let Some(subs) = self.inner.subscribers.lock().unwrap().get_mut(&self.topic) {
            subs.retain(|(id, _)| *id != self.id);
        }
    }
}
