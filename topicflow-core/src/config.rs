use std::fmt;
use std::time::Duration;

use crate::broker::AutoOffsetReset;

const DEFAULT_CONSUMER_GROUP: &str = "topicflow";
const DEFAULT_CLIENT_ID: &str = "topicflow";
const DEFAULT_POLL_INTERVAL_MILLIS: u64 = 100;
const DEFAULT_COMMIT_INTERVAL_MILLIS: u64 = 1000;
const DEFAULT_BATCH_SIZE: usize = 1000;
const DEFAULT_BATCH_TIMEOUT_MILLIS: u64 = 1000;
const DEFAULT_QUEUE_ALARM_THRESHOLD: usize = 100_000;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;

/// Consumer group level settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    pub brokers: Vec<String>,
    pub consumer_group: String,
    pub client_id: String,
    /// Initial position of a partition that has no committed offset.
    pub auto_offset_reset: AutoOffsetReset,
    /// How long a single broker poll may wait. Cancellation is observed between polls.
    pub poll_interval: Duration,
    /// How often processed offsets are committed.
    pub commit_interval: Duration,
    pub host: HostSettings,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            auto_offset_reset: AutoOffsetReset::default(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MILLIS),
            commit_interval: Duration::from_millis(DEFAULT_COMMIT_INTERVAL_MILLIS),
            host: HostSettings::default(),
        }
    }
}

/// What happens to records that are still queued when their partition is revoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RevokedRecordPolicy {
    /// Drop them at dequeue time. The new owner reads them again from the last commit.
    #[default]
    Discard,
    /// Hand them to the processor anyway. Their offsets are still never committed.
    Process,
}

impl fmt::Display for RevokedRecordPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevokedRecordPolicy::Discard => write!(f, "discard"),
            RevokedRecordPolicy::Process => write!(f, "process"),
        }
    }
}

/// Per-topic processor host settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSettings {
    /// Max records per processor call.
    pub batch_size: usize,
    /// Max time a batch waits to fill up, counted from its first record.
    pub batch_timeout: Duration,
    /// The queue is unbounded; crossing this depth raises an alarm.
    pub queue_alarm_threshold: usize,
    /// When set, the topic's partitions are paused at the broker at this depth and resumed
    /// once the queue drained to half of it.
    pub pause_threshold: Option<usize>,
    pub revoked_records: RevokedRecordPolicy,
    /// Bound for joining the worker on stop.
    pub stop_timeout: Duration,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: Duration::from_millis(DEFAULT_BATCH_TIMEOUT_MILLIS),
            queue_alarm_threshold: DEFAULT_QUEUE_ALARM_THRESHOLD,
            pause_threshold: None,
            revoked_records: RevokedRecordPolicy::default(),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
        }
    }
}

impl HostSettings {
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(crate::Error::Config("batch size must be positive".into()));
        }
        if let Some(threshold) = self.pause_threshold {
            if threshold < 2 {
                return Err(crate::Error::Config(format!(
                    "pause threshold must be at least 2, got {threshold}"
                )));
            }
        }
        Ok(())
    }
}
