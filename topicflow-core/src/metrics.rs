//! Prometheus metrics of the consumer. All metrics live in one process-global registry so the
//! processors crate can register its own metrics next to these and the binary can expose them
//! on a single endpoint.

use std::sync::OnceLock;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

use crate::Error;

const REGISTRY_PREFIX: &str = "topicflow";

pub(crate) const TOPIC_LABEL: &str = "topic";

// counters (the `_total` suffix is added by the client library)
const RECORDS_RECEIVED: &str = "records_received";
const RECORDS_DISCARDED: &str = "records_discarded";
const BATCHES_PROCESSED: &str = "batches_processed";
const BATCHES_FAILED: &str = "batches_failed";
const REBALANCES: &str = "rebalances";
const CONSUME_ERRORS: &str = "consume_errors";
const OFFSETS_COMMITTED: &str = "offsets_committed";
const COMMIT_FAILURES: &str = "commit_failures";

// gauges
const QUEUE_DEPTH: &str = "queue_depth";

// timers
const PROCESSING_TIME: &str = "processing_time";

/// The global register of all metrics.
struct GlobalRegistry {
    // It is okay to use a sync mutex because we register each metric only one time.
    registry: parking_lot::Mutex<Registry>,
}

impl GlobalRegistry {
    fn new() -> Self {
        GlobalRegistry {
            registry: parking_lot::Mutex::new(Registry::with_prefix(REGISTRY_PREFIX)),
        }
    }
}

static GLOBAL_REGISTRY: OnceLock<GlobalRegistry> = OnceLock::new();

fn global_registry() -> &'static GlobalRegistry {
    GLOBAL_REGISTRY.get_or_init(GlobalRegistry::new)
}

/// Registers metrics defined outside of this crate in the global registry.
pub fn register<F>(f: F)
where
    F: FnOnce(&mut Registry),
{
    let mut registry = global_registry().registry.lock();
    f(&mut registry);
}

/// Encodes all the registered metrics in the OpenMetrics text format.
pub fn encode_metrics() -> crate::Result<String> {
    // make sure the consumer metrics are registered even before the first record
    let _ = consumer_metrics();
    let mut buffer = String::new();
    let registry = global_registry().registry.lock();
    encode(&mut buffer, &registry).map_err(|e| Error::Metrics(format!("encoding metrics: {e}")))?;
    Ok(buffer)
}

/// Labels of the per-topic metric families.
pub(crate) fn topic_labels(topic: &str) -> Vec<(String, String)> {
    vec![(TOPIC_LABEL.to_string(), topic.to_string())]
}

/// Metrics of the coordinator and the processor hosts. Each metric is a family keyed by labels.
pub(crate) struct ConsumerMetrics {
    pub(crate) records_received: Family<Vec<(String, String)>, Counter>,
    pub(crate) records_discarded: Family<Vec<(String, String)>, Counter>,
    pub(crate) batches_processed: Family<Vec<(String, String)>, Counter>,
    pub(crate) batches_failed: Family<Vec<(String, String)>, Counter>,
    pub(crate) consume_errors: Family<Vec<(String, String)>, Counter>,
    pub(crate) queue_depth: Family<Vec<(String, String)>, Gauge>,
    pub(crate) processing_time: Family<Vec<(String, String)>, Histogram>,
    pub(crate) rebalances: Counter,
    pub(crate) offsets_committed: Counter,
    pub(crate) commit_failures: Counter,
}

impl ConsumerMetrics {
    fn new() -> Self {
        let metrics = Self {
            records_received: Family::default(),
            records_discarded: Family::default(),
            batches_processed: Family::default(),
            batches_failed: Family::default(),
            consume_errors: Family::default(),
            queue_depth: Family::default(),
            processing_time: Family::new_with_constructor(|| {
                // 1ms .. ~32s
                Histogram::new(exponential_buckets(1.0, 2.0, 16))
            }),
            rebalances: Counter::default(),
            offsets_committed: Counter::default(),
            commit_failures: Counter::default(),
        };

        let mut registry = global_registry().registry.lock();
        registry.register(
            RECORDS_RECEIVED,
            "Total number of records received from the broker",
            metrics.records_received.clone(),
        );
        registry.register(
            RECORDS_DISCARDED,
            "Total number of queued records discarded because their partition was revoked",
            metrics.records_discarded.clone(),
        );
        registry.register(
            BATCHES_PROCESSED,
            "Total number of batches handed to processors successfully",
            metrics.batches_processed.clone(),
        );
        registry.register(
            BATCHES_FAILED,
            "Total number of batches the processor failed",
            metrics.batches_failed.clone(),
        );
        registry.register(
            CONSUME_ERRORS,
            "Total number of broker reported consume errors",
            metrics.consume_errors.clone(),
        );
        registry.register(
            QUEUE_DEPTH,
            "Number of records queued for a topic's processor",
            metrics.queue_depth.clone(),
        );
        registry.register(
            PROCESSING_TIME,
            "Time taken by a processor to handle a batch, in milliseconds",
            metrics.processing_time.clone(),
        );
        registry.register(
            REBALANCES,
            "Total number of partition assignments and revocations",
            metrics.rebalances.clone(),
        );
        registry.register(
            OFFSETS_COMMITTED,
            "Total number of partition offsets committed",
            metrics.offsets_committed.clone(),
        );
        registry.register(
            COMMIT_FAILURES,
            "Total number of failed offset commits",
            metrics.commit_failures.clone(),
        );
        metrics
    }
}

static CONSUMER_METRICS: OnceLock<ConsumerMetrics> = OnceLock::new();

pub(crate) fn consumer_metrics() -> &'static ConsumerMetrics {
    CONSUMER_METRICS.get_or_init(ConsumerMetrics::new)
}
