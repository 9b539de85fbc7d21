//! Processors of the topicflow consumer.
//!
//! Every topic is a routing key `<kind>.<project>.<environment>[.<service>]` and the kind picks
//! the processor (see [`DefaultProcessorProvider`]):
//! - `logs`: JSON documents indexed per day ([`processor::LogsProcessor`])
//! - `metrics`: metric events forwarded as named metrics ([`processor::MetricsProcessor`])
//! - `app-events`, `traces`: observations aggregated per period
//!   ([`processor::AggregatingProcessor`], [`aggregate`])

mod error;
pub use crate::error::{Error, Result};

pub mod aggregate;
pub mod config;
pub mod event;
pub mod naming;
pub mod processor;
pub mod routing;
pub mod sink;
pub mod span;

mod metrics;
mod provider;

pub use config::AggregationSettings;
pub use event::{Metric, MetricEvent, Tags};
pub use provider::DefaultProcessorProvider;
pub use routing::{EventKind, RoutingKey};
pub use sink::{Document, DocumentSink, LogDocumentSink, LogMetricSink, MetricSink};
