use std::sync::Arc;

use async_trait::async_trait;
use topicflow_core::{EventProcessor, Record};

use crate::event::{Metric, MetricEvent};
use crate::naming::MetricConverter;
use crate::processor::decode;
use crate::routing::RoutingKey;
use crate::sink::MetricSink;

/// Forwards metric events, named after their routing key and tags, to the metrics transport.
pub struct MetricsProcessor {
    converter: MetricConverter,
    sink: Arc<dyn MetricSink>,
}

impl MetricsProcessor {
    pub fn new(routing_key: &RoutingKey, sink: Arc<dyn MetricSink>) -> Self {
        Self {
            converter: MetricConverter::new(routing_key),
            sink,
        }
    }
}

#[async_trait]
impl EventProcessor for MetricsProcessor {
    async fn process(&mut self, batch: Vec<Record>) -> topicflow_core::Result<()> {
        let metrics: Vec<Metric> = batch
            .iter()
            .filter_map(decode::<MetricEvent>)
            .flat_map(|event| self.converter.convert(&event))
            .collect();
        if !metrics.is_empty() {
            self.sink.send(metrics).await?;
        }
        Ok(())
    }
}
