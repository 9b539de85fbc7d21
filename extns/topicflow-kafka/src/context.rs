use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rdkafka::Offset;
use rdkafka::client::ClientContext;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::topic_partition_list::TopicPartitionList;
use topicflow_core::{BrokerEvent, TopicPartition, TopicPartitionOffset};
use tracing::{debug, error, info, warn};

/// Events raised by librdkafka callbacks, waiting to be handed out by the next poll.
pub(crate) type EventQueue = Arc<Mutex<VecDeque<BrokerEvent>>>;

/// Turns the librdkafka callbacks into [`BrokerEvent`]s. The callbacks run on whichever thread
/// serves the consumer queue, so they only enqueue.
pub(crate) struct TopicflowContext {
    events: EventQueue,
}

impl TopicflowContext {
    pub(crate) fn new(events: EventQueue) -> Self {
        Self { events }
    }

    fn push(&self, event: BrokerEvent) {
        self.events.lock().push_back(event);
    }
}

/// Severity of a librdkafka log line: the tracing level and whether it is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
}

pub(crate) fn severity(level: RDKafkaLogLevel) -> Severity {
    match level {
        RDKafkaLogLevel::Emerg | RDKafkaLogLevel::Alert | RDKafkaLogLevel::Critical => {
            Severity::Fatal
        }
        RDKafkaLogLevel::Error => Severity::Error,
        RDKafkaLogLevel::Warning => Severity::Warn,
        RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => Severity::Info,
        RDKafkaLogLevel::Debug => Severity::Debug,
    }
}

pub(crate) fn tpl_partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect()
}

pub(crate) fn tpl_offsets(tpl: &TopicPartitionList) -> Vec<TopicPartitionOffset> {
    tpl.elements()
        .iter()
        .filter_map(|elem| match elem.offset() {
            Offset::Offset(offset) => Some(TopicPartitionOffset::new(
                elem.topic(),
                elem.partition(),
                offset,
            )),
            _ => None,
        })
        .collect()
}

impl ClientContext for TopicflowContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match severity(level) {
            Severity::Fatal => error!(fac, fatal = true, "librdkafka: {log_message}"),
            Severity::Error => error!(fac, "librdkafka: {log_message}"),
            Severity::Warn => warn!(fac, "librdkafka: {log_message}"),
            Severity::Info => info!(fac, "librdkafka: {log_message}"),
            Severity::Debug => debug!(fac, "librdkafka: {log_message}"),
        }
    }

    fn stats_raw(&self, statistics: &[u8]) {
        self.push(BrokerEvent::Statistics(
            String::from_utf8_lossy(statistics).into_owned(),
        ));
    }

    fn error(&self, error: KafkaError, reason: &str) {
        let fatal = error.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal);
        self.push(BrokerEvent::Error {
            reason: format!("{error}: {reason}"),
            fatal,
        });
    }
}

// The rebalance itself (assign/unassign) is performed by the default `rebalance` callback
// between these two hooks.
#[allow(elided_lifetimes_in_paths)]
impl ConsumerContext for TopicflowContext {
    fn pre_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => self.push(BrokerEvent::Revoked(tpl_partitions(tpl))),
            Rebalance::Assign(_) => debug!("Partition assignment started"),
            Rebalance::Error(err) => self.push(BrokerEvent::Error {
                reason: format!("rebalance failed: {err}"),
                fatal: false,
            }),
        }
    }

    fn post_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            self.push(BrokerEvent::Assigned(tpl_partitions(tpl)));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        self.push(BrokerEvent::OffsetsCommitted {
            offsets: tpl_offsets(offsets),
            error: result.err().map(|e| e.to_string()),
        });
    }
}
