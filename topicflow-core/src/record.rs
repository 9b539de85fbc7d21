use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// A position within a partition. When used for commits, `offset` is the next offset to be
/// read, as per Kafka semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl TopicPartitionOffset {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

impl fmt::Display for TopicPartitionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// Record is the immutable unit read from the broker. The topic doubles as the routing key
/// of the pipeline the record belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// The topic (routing key) the record was read from.
    pub topic: String,
    /// The partition number.
    pub partition: i32,
    /// The offset of the record within its partition.
    pub offset: i64,
    /// Key of the record, if any.
    pub key: Option<Bytes>,
    /// The user payload.
    pub value: Bytes,
    /// The broker timestamp of the record.
    pub timestamp: DateTime<Utc>,
}

impl Record {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}
