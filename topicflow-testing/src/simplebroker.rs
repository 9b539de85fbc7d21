//! An in-memory partitioned broker with a single consumer group member. Tests produce records
//! into it, drive rebalances by hand and inspect what the coordinator committed, paused and
//! closed, without a Kafka cluster.
//!
//! ```text
//! SimpleBroker (shared state) --consumer()--> SimpleConsumer (implements Broker)
//!        ^ produce / inject_assign / inject_revoke / committed
//! ```

mod consumer;
mod error_injector;
mod state;

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use topicflow_core::{AutoOffsetReset, BrokerEvent, TopicPartition};

pub use consumer::SimpleConsumer;
pub use error_injector::ErrorInjector;

use state::{BrokerState, StoredRecord};

/// Handle to the in-memory broker. Clones share the same state.
#[derive(Clone)]
pub struct SimpleBroker {
    state: Arc<Mutex<BrokerState>>,
    error_injector: Arc<ErrorInjector>,
}

impl Default for SimpleBroker {
    fn default() -> Self {
        Self::new(AutoOffsetReset::Earliest)
    }
}

impl SimpleBroker {
    /// Creates a broker without topics. `auto_offset_reset` decides where partitions without a
    /// committed offset start.
    pub fn new(auto_offset_reset: AutoOffsetReset) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new(auto_offset_reset))),
            error_injector: Arc::new(ErrorInjector::new()),
        }
    }

    /// Creates a topic with the given number of partitions. Existing topics are left untouched.
    pub fn create_topic(&self, topic: &str, partitions: usize) {
        self.state
            .lock()
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions]);
    }

    /// Appends a record timestamped now, returns its offset.
    pub fn produce(&self, topic: &str, partition: i32, key: Option<&str>, value: impl Into<Bytes>) -> i64 {
        self.produce_at(topic, partition, key, value, Utc::now())
    }

    /// Appends a record with the given broker timestamp, returns its offset.
    ///
    /// # Panics
    /// When the topic or the partition does not exist.
    pub fn produce_at(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&str>,
        value: impl Into<Bytes>,
        timestamp: DateTime<Utc>,
    ) -> i64 {
        let mut state = self.state.lock();
        let log = state
            .topics
            .get_mut(topic)
            .and_then(|partitions| partitions.get_mut(partition as usize))
            .unwrap_or_else(|| panic!("unknown partition {topic}/{partition}"));
        log.push(StoredRecord {
            key: key.map(|k| Bytes::copy_from_slice(k.as_bytes())),
            value: value.into(),
            timestamp,
        });
        log.len() as i64 - 1
    }

    /// Number of records in a partition.
    pub fn len(&self, topic: &str, partition: i32) -> usize {
        self.state
            .lock()
            .topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
            .map_or(0, Vec::len)
    }

    /// Queues a group rebalance handing the partitions to the member.
    pub fn inject_assign(&self, partitions: Vec<TopicPartition>) {
        self.inject_event(BrokerEvent::Assigned(partitions));
    }

    /// Queues a group rebalance taking the partitions away from the member.
    pub fn inject_revoke(&self, partitions: Vec<TopicPartition>) {
        self.inject_event(BrokerEvent::Revoked(partitions));
    }

    /// Queues an arbitrary event, it is returned by the next poll before any record.
    pub fn inject_event(&self, event: BrokerEvent) {
        self.state.lock().pending_events.push_back(event);
    }

    /// Last committed offset (next offset to read) of a partition.
    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .committed
            .get(&TopicPartition::new(topic, partition))
            .copied()
    }

    /// Partitions the member currently fetches, sorted.
    pub fn assigned(&self) -> Vec<TopicPartition> {
        self.state.lock().positions.keys().cloned().collect()
    }

    /// Partitions currently paused, sorted.
    pub fn paused(&self) -> Vec<TopicPartition> {
        let mut paused: Vec<TopicPartition> = self.state.lock().paused.iter().cloned().collect();
        paused.sort();
        paused
    }

    /// Whether a pause was ever requested for the topic.
    pub fn was_paused(&self, topic: &str) -> bool {
        self.state.lock().pause_history.iter().any(|tp| tp.topic == topic)
    }

    /// Topics the member subscribed to.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscribed.clone()
    }

    /// Number of successful commit calls.
    pub fn commit_count(&self) -> usize {
        self.state.lock().commit_count
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Error injector controlling the failures of the consumer.
    pub fn error_injector(&self) -> &ErrorInjector {
        &self.error_injector
    }

    /// The group member to hand to a coordinator.
    pub fn consumer(&self) -> SimpleConsumer {
        SimpleConsumer::new(Arc::clone(&self.state), Arc::clone(&self.error_injector))
    }
}
