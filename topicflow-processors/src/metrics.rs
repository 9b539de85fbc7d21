//! Metrics of the processors, registered in the consumer's global registry so they are served
//! together with the consumer metrics.

use std::sync::OnceLock;

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;

const MISSED_PAST_EVENTS: &str = "missed_past_events";
const MISSED_FUTURE_EVENTS: &str = "missed_future_events";
const DERIVED_EVENTS: &str = "derived_events";
const RECORDS_SKIPPED: &str = "records_skipped";

pub(crate) const ROUTING_KEY_LABEL: &str = "routing_key";

pub(crate) fn routing_key_labels(routing_key: &str) -> Vec<(String, String)> {
    vec![(ROUTING_KEY_LABEL.to_string(), routing_key.to_string())]
}

pub(crate) struct ProcessorMetrics {
    pub(crate) missed_past_events: Family<Vec<(String, String)>, Counter>,
    pub(crate) missed_future_events: Family<Vec<(String, String)>, Counter>,
    pub(crate) derived_events: Family<Vec<(String, String)>, Counter>,
    pub(crate) records_skipped: Family<Vec<(String, String)>, Counter>,
}

impl ProcessorMetrics {
    fn new() -> Self {
        let metrics = Self {
            missed_past_events: Family::default(),
            missed_future_events: Family::default(),
            derived_events: Family::default(),
            records_skipped: Family::default(),
        };
        topicflow_core::metrics::register(|registry| {
            registry.register(
                MISSED_PAST_EVENTS,
                "Observations dropped because their time bin was already closed",
                metrics.missed_past_events.clone(),
            );
            registry.register(
                MISSED_FUTURE_EVENTS,
                "Observations dropped because they are too far ahead of the clock",
                metrics.missed_future_events.clone(),
            );
            registry.register(
                DERIVED_EVENTS,
                "Derived metric events emitted by closed time bins",
                metrics.derived_events.clone(),
            );
            registry.register(
                RECORDS_SKIPPED,
                "Records skipped because their payload could not be decoded",
                metrics.records_skipped.clone(),
            );
        });
        metrics
    }
}

static PROCESSOR_METRICS: OnceLock<ProcessorMetrics> = OnceLock::new();

pub(crate) fn processor_metrics() -> &'static ProcessorMetrics {
    PROCESSOR_METRICS.get_or_init(ProcessorMetrics::new)
}
