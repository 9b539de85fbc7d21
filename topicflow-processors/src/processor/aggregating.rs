use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use topicflow_core::{EventProcessor, Record};
use tracing::{debug, info};

use crate::aggregate::{Aggregator, Flusher};
use crate::config::AggregationSettings;
use crate::error::{Error, Result};
use crate::event::MetricEvent;
use crate::naming::MetricConverter;
use crate::processor::decode;
use crate::routing::{EventKind, RoutingKey};
use crate::sink::MetricSink;
use crate::span::Span;

/// Aggregates `app-events` and `traces` records into per period metrics. Observations go into
/// an [`Aggregator`]; its [`Flusher`] forwards the closed bins to the metrics transport and
/// drains the remaining ones when the pipeline shuts down.
pub struct AggregatingProcessor {
    routing_key: RoutingKey,
    aggregator: Arc<Aggregator>,
    flusher: Option<Flusher>,
}

impl AggregatingProcessor {
    /// Creates the processor and starts its flusher. Must be called within a tokio runtime.
    pub fn start(
        routing_key: RoutingKey,
        settings: AggregationSettings,
        sink: Arc<dyn MetricSink>,
    ) -> Result<Self> {
        if !matches!(routing_key.kind(), EventKind::AppEvents | EventKind::Traces) {
            return Err(Error::Config(format!(
                "{} events are not aggregated",
                routing_key.kind()
            )));
        }
        settings.validate()?;

        let aggregator = Arc::new(Aggregator::new(routing_key.as_str(), settings, Utc::now()));
        let flusher = Flusher::start(
            Arc::clone(&aggregator),
            MetricConverter::new(&routing_key),
            sink,
        );
        info!(routing_key = %routing_key, "Started aggregation");
        Ok(Self {
            routing_key,
            aggregator,
            flusher: Some(flusher),
        })
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        Arc::clone(&self.aggregator)
    }

    fn observation(&self, record: &Record) -> Option<MetricEvent> {
        match self.routing_key.kind() {
            EventKind::Traces => {
                let span: Span = decode(record)?;
                let event = span.to_metric_event();
                if event.is_none() {
                    debug!(
                        trace_prefix = %span.trace_id_prefix(),
                        span_id = %span.span_id,
                        "Skipping unfinished span"
                    );
                }
                event
            }
            _ => decode(record),
        }
    }
}

#[async_trait]
impl EventProcessor for AggregatingProcessor {
    async fn process(&mut self, batch: Vec<Record>) -> topicflow_core::Result<()> {
        for record in &batch {
            if let Some(event) = self.observation(record) {
                self.aggregator.consume(&event);
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> topicflow_core::Result<()> {
        if let Some(flusher) = self.flusher.take() {
            flusher.stop().await?;
        }
        Ok(())
    }
}
