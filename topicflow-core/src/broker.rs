//! Contract between the coordinator and a partitioned log broker client. Everything the client
//! wants to tell the coordinator (rebalances, records, errors, commit results, statistics) comes
//! out of a single [`LocalBroker::poll`] as one [`BrokerEvent`] variant, so that the interaction
//! of assignment changes with record dispatch happens in one place, the poll loop.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::Result;
use crate::record::{Record, TopicPartition, TopicPartitionOffset};

/// Events surfaced by the broker client.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// The group assigned these partitions to this member.
    Assigned(Vec<TopicPartition>),
    /// The group took these partitions away from this member.
    Revoked(Vec<TopicPartition>),
    /// A record from an owned partition.
    Record(Record),
    /// The broker reported an error for a specific message. The message is skipped.
    ConsumeError {
        topic: String,
        partition: i32,
        offset: i64,
        timestamp: Option<DateTime<Utc>>,
        reason: String,
    },
    /// A client level error. `fatal` errors are non-recoverable.
    Error { reason: String, fatal: bool },
    /// End of a partition was reached. Not every client knows the topic.
    PartitionEof {
        topic: Option<String>,
        partition: i32,
    },
    /// Result of an offsets commit.
    OffsetsCommitted {
        offsets: Vec<TopicPartitionOffset>,
        error: Option<String>,
    },
    /// Client statistics as reported by the broker client (JSON).
    Statistics(String),
}

/// Where to start reading a partition that has no committed offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AutoOffsetReset {
    Earliest,
    #[default]
    Latest,
}

impl AutoOffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoOffsetReset::Earliest => "earliest",
            AutoOffsetReset::Latest => "latest",
        }
    }
}

impl std::str::FromStr for AutoOffsetReset {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "earliest" => Ok(AutoOffsetReset::Earliest),
            "latest" => Ok(AutoOffsetReset::Latest),
            other => Err(crate::Error::Config(format!(
                "unknown auto offset reset policy '{other}', expected 'earliest' or 'latest'"
            ))),
        }
    }
}

/// Set of operations a broker client has to implement to be driven by the
/// [`Coordinator`](crate::coordinator::Coordinator). The connection is exclusively owned by the
/// coordinator and only ever used from its poll loop.
#[trait_variant::make(Broker: Send)]
#[allow(dead_code)]
pub trait LocalBroker {
    /// Names of all topics known to the broker.
    async fn topics(&mut self) -> Result<Vec<String>>;

    /// Joins the consumer group subscribed to the given topics.
    async fn subscribe(&mut self, topics: &[String]) -> Result<()>;

    /// Starts fetching the given partitions from the earliest unread (committed) offset, falling
    /// back to the configured [`AutoOffsetReset`] when nothing was committed.
    async fn assign(&mut self, partitions: &[TopicPartition]) -> Result<()>;

    /// Stops fetching the given partitions.
    async fn unassign(&mut self, partitions: &[TopicPartition]) -> Result<()>;

    /// Waits up to `timeout` for the next event. `Ok(None)` means nothing happened, an `Err` is
    /// a non-recoverable broker condition.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerEvent>>;

    /// Commits the given offsets (next offset to be read per partition).
    async fn commit(&mut self, offsets: &[TopicPartitionOffset]) -> Result<()>;

    /// Stops fetching the given partitions without giving up ownership.
    async fn pause(&mut self, partitions: &[TopicPartition]) -> Result<()>;

    /// Resumes fetching previously paused partitions.
    async fn resume(&mut self, partitions: &[TopicPartition]) -> Result<()>;

    /// Leaves the group and releases the connection.
    async fn close(&mut self) -> Result<()>;
}
