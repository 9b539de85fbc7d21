//! Consumer group host for a partitioned log broker.
//!
//! The [`Coordinator`] owns the broker connection and the partition assignment, and routes every
//! record by topic to that topic's [`ProcessorHost`]. Each host runs the topic's
//! [`EventProcessor`] on its own task so that slow processing never holds up the poll loop
//! (and with it heartbeats and rebalances):
//! - Ask the [`ProcessorProvider`] which topics have a processor
//! - Start a host per matched topic, then subscribe
//! - Poll the broker, enqueue records to their host, track ownership in the [`Ledger`]
//! - Commit offsets of batches the processors finished (at-least-once)

mod error;
pub use crate::error::{Error, Result};

pub mod broker;
pub mod config;
pub mod coordinator;
pub mod host;
pub mod ledger;
pub mod metrics;
pub mod processor;
pub mod record;

pub use broker::{AutoOffsetReset, Broker, BrokerEvent, LocalBroker};
pub use config::{ConsumerSettings, HostSettings, RevokedRecordPolicy};
pub use coordinator::{Coordinator, CoordinatorState};
pub use host::{HostState, ProcessorHost};
pub use ledger::{Generation, Ledger};
pub use processor::{EventProcessor, ProcessorProvider};
pub use record::{Record, TopicPartition, TopicPartitionOffset};
