use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rdkafka::Offset;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::stream_consumer::StreamConsumer;
use rdkafka::consumer::{CommitMode, Consumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::topic_partition_list::TopicPartitionList;
use topicflow_core::{
    Broker, BrokerEvent, Record, TopicPartition, TopicPartitionOffset,
};
use tracing::{debug, info};

use crate::context::{EventQueue, TopicflowContext};
use crate::{Error, KafkaSettings};

type TopicflowConsumer = StreamConsumer<TopicflowContext>;

/// [`Broker`] on top of a Kafka consumer group.
///
/// librdkafka assigns and revokes partitions itself from inside the rebalance callback, so
/// [`Broker::assign`] and [`Broker::unassign`] only acknowledge what already happened. A commit
/// for revoked partitions issued after the revocation is rejected by the group, the offsets
/// are read again by the next owner.
pub struct KafkaBroker {
    consumer: Arc<TopicflowConsumer>,
    events: EventQueue,
    brokers: String,
    metadata_timeout: Duration,
}

impl KafkaBroker {
    /// Creates the consumer. Nothing is fetched before [`Broker::subscribe`].
    pub fn new(settings: &KafkaSettings) -> crate::Result<Self> {
        let mut client_config = settings.client_config();
        client_config.set_log_level(RDKafkaLogLevel::Info);

        let events = EventQueue::default();
        let context = TopicflowContext::new(Arc::clone(&events));
        let brokers = settings.brokers.join(",");
        let consumer: TopicflowConsumer =
            client_config
                .create_with_context(context)
                .map_err(|err| Error::Connection {
                    server: brokers.clone(),
                    error: err.to_string(),
                })?;

        info!(brokers = %brokers, group = %settings.consumer_group, "Created Kafka consumer");
        Ok(Self {
            consumer: Arc::new(consumer),
            events,
            brokers,
            metadata_timeout: settings.metadata_timeout,
        })
    }

    fn next_queued(&self) -> Option<BrokerEvent> {
        self.events.lock().pop_front()
    }
}

fn partition_list(partitions: &[TopicPartition]) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    for tp in partitions {
        tpl.add_partition(&tp.topic, tp.partition);
    }
    tpl
}

fn offset_list(offsets: &[TopicPartitionOffset]) -> crate::Result<TopicPartitionList> {
    let mut tpl = TopicPartitionList::new();
    for tpo in offsets {
        tpl.add_partition_offset(&tpo.topic, tpo.partition, Offset::Offset(tpo.offset))
            .map_err(|e| Error::Kafka(format!("Invalid offset {tpo}: {e}")))?;
    }
    Ok(tpl)
}

/// Converts the outcome of a receive into an event. Must not be held across an await point,
/// the message borrows the consumer.
fn to_event(message: KafkaResult<BorrowedMessage<'_>>) -> BrokerEvent {
    match message {
        Ok(message) => {
            let timestamp = message
                .timestamp()
                .to_millis()
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or_else(Utc::now);
            BrokerEvent::Record(Record {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(Bytes::copy_from_slice),
                value: message
                    .payload()
                    .map(Bytes::copy_from_slice)
                    .unwrap_or_default(),
                timestamp,
            })
        }
        Err(KafkaError::PartitionEOF(partition)) => BrokerEvent::PartitionEof {
            topic: None,
            partition,
        },
        Err(err) => BrokerEvent::Error {
            reason: format!("consume failed: {err}"),
            fatal: false,
        },
    }
}

impl Broker for KafkaBroker {
    async fn topics(&mut self) -> topicflow_core::Result<Vec<String>> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.metadata_timeout;
        // fetch_metadata blocks on a broker round trip
        let topics = tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, timeout)
                .map(|metadata| {
                    metadata
                        .topics()
                        .iter()
                        .map(|topic| topic.name().to_string())
                        .collect::<Vec<_>>()
                })
                .map_err(|e| Error::Kafka(format!("Failed to fetch metadata: {e}")))
        })
        .await??;
        Ok(topics)
    }

    async fn subscribe(&mut self, topics: &[String]) -> topicflow_core::Result<()> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics).map_err(|e| {
            Error::Kafka(format!("Failed to subscribe to {topics:?} on {}: {e}", self.brokers))
        })?;
        info!(?topics, "Subscribed");
        Ok(())
    }

    async fn assign(&mut self, partitions: &[TopicPartition]) -> topicflow_core::Result<()> {
        debug!(?partitions, "Partitions assigned by the group");
        Ok(())
    }

    async fn unassign(&mut self, partitions: &[TopicPartition]) -> topicflow_core::Result<()> {
        debug!(?partitions, "Partitions revoked by the group");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> topicflow_core::Result<Option<BrokerEvent>> {
        if let Some(event) = self.next_queued() {
            return Ok(Some(event));
        }

        let event = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(received) => to_event(received),
            Err(_) => return Ok(self.next_queued()),
        };

        // callbacks served while receiving happened before the message was handed out
        let mut events = self.events.lock();
        if events.is_empty() {
            return Ok(Some(event));
        }
        events.push_back(event);
        Ok(events.pop_front())
    }

    async fn commit(&mut self, offsets: &[TopicPartitionOffset]) -> topicflow_core::Result<()> {
        if offsets.is_empty() {
            return Ok(());
        }
        let tpl = offset_list(offsets)?;
        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || {
            consumer
                .commit(&tpl, CommitMode::Sync)
                .map_err(|e| Error::Kafka(format!("Failed to commit offsets: {e}")))
        })
        .await??;
        Ok(())
    }

    async fn pause(&mut self, partitions: &[TopicPartition]) -> topicflow_core::Result<()> {
        self.consumer
            .pause(&partition_list(partitions))
            .map_err(|e| Error::Kafka(format!("Failed to pause {partitions:?}: {e}")))?;
        Ok(())
    }

    async fn resume(&mut self, partitions: &[TopicPartition]) -> topicflow_core::Result<()> {
        self.consumer
            .resume(&partition_list(partitions))
            .map_err(|e| Error::Kafka(format!("Failed to resume {partitions:?}: {e}")))?;
        Ok(())
    }

    async fn close(&mut self) -> topicflow_core::Result<()> {
        self.consumer.unsubscribe();
        self.events.lock().clear();
        info!(brokers = %self.brokers, "Left the consumer group");
        Ok(())
    }
}
