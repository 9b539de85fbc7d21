//! Kafka implementation of the topicflow [`Broker`](topicflow_core::Broker) contract.

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use topicflow_core::{AutoOffsetReset, ConsumerSettings};

mod consumer;
mod context;

pub use consumer::KafkaBroker;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Connecting to Kafka {server} - {error}")]
    Connection { server: String, error: String },

    #[error("Kafka - {0}")]
    Kafka(String),

    #[error("{0}")]
    Other(String),
}

impl From<Error> for topicflow_core::Error {
    fn from(err: Error) -> Self {
        topicflow_core::Error::Broker(err.to_string())
    }
}

const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_STATISTICS_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct KafkaSettings {
    /// The list of Kafka brokers to connect to.
    pub brokers: Vec<String>,
    pub consumer_group: String,
    pub client_id: String,
    pub auto_offset_reset: AutoOffsetReset,
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// How often the client emits its statistics.
    pub statistics_interval: Duration,
    /// Bound for metadata requests and synchronous commits.
    pub metadata_timeout: Duration,
    /// Any supported kafka client configuration options from
    /// https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
    pub kafka_raw_config: HashMap<String, String>,
}

impl From<&ConsumerSettings> for KafkaSettings {
    fn from(settings: &ConsumerSettings) -> Self {
        Self {
            brokers: settings.brokers.clone(),
            consumer_group: settings.consumer_group.clone(),
            client_id: settings.client_id.clone(),
            auto_offset_reset: settings.auto_offset_reset,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            statistics_interval: DEFAULT_STATISTICS_INTERVAL,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            kafka_raw_config: HashMap::new(),
        }
    }
}

impl KafkaSettings {
    /// The client configuration. Offsets are managed by the coordinator: nothing is committed
    /// or stored automatically.
    pub(crate) fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        // https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
        client_config
            .set("enable.partition.eof", "true")
            .set("partition.assignment.strategy", "roundrobin")
            .set(
                "statistics.interval.ms",
                self.statistics_interval.as_millis().to_string(),
            )
            .set(
                "session.timeout.ms",
                self.session_timeout.as_millis().to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.heartbeat_interval.as_millis().to_string(),
            )
            .set("auto.offset.reset", self.auto_offset_reset.as_str());
        for (key, value) in &self.kafka_raw_config {
            client_config.set(key, value);
        }
        client_config
            .set("group.id", &self.consumer_group)
            .set("client.id", &self.client_id)
            .set("bootstrap.servers", self.brokers.join(","))
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false");
        client_config
    }
}
