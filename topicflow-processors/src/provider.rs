use std::sync::Arc;

use topicflow_core::{EventProcessor, ProcessorProvider};
use tracing::{debug, error};

use crate::config::AggregationSettings;
use crate::error::Result;
use crate::processor::{AggregatingProcessor, LogsProcessor, MetricsProcessor};
use crate::routing::{EventKind, RoutingKey};
use crate::sink::{DocumentSink, MetricSink};

/// Picks the processor of a topic by the event kind of its routing key. Topics that are not
/// routing keys get no processor and are not subscribed.
pub struct DefaultProcessorProvider {
    metric_sink: Arc<dyn MetricSink>,
    document_sink: Arc<dyn DocumentSink>,
    aggregation: AggregationSettings,
}

impl DefaultProcessorProvider {
    /// Fails with a config error when the aggregation settings are invalid.
    pub fn new(
        metric_sink: Arc<dyn MetricSink>,
        document_sink: Arc<dyn DocumentSink>,
        aggregation: AggregationSettings,
    ) -> Result<Self> {
        aggregation.validate()?;
        Ok(Self {
            metric_sink,
            document_sink,
            aggregation,
        })
    }
}

impl ProcessorProvider for DefaultProcessorProvider {
    fn try_get_processor(&mut self, topic: &str) -> Option<Box<dyn EventProcessor>> {
        let routing_key = match RoutingKey::parse(topic) {
            Ok(routing_key) => routing_key,
            Err(e) => {
                debug!(topic, ?e, "No processor for topic");
                return None;
            }
        };
        match routing_key.kind() {
            EventKind::Logs => Some(Box::new(LogsProcessor::new(
                &routing_key,
                Arc::clone(&self.document_sink),
            ))),
            EventKind::Metrics => Some(Box::new(MetricsProcessor::new(
                &routing_key,
                Arc::clone(&self.metric_sink),
            ))),
            EventKind::AppEvents | EventKind::Traces => {
                match AggregatingProcessor::start(
                    routing_key,
                    self.aggregation.clone(),
                    Arc::clone(&self.metric_sink),
                ) {
                    Ok(processor) => Some(Box::new(processor)),
                    Err(e) => {
                        error!(topic, ?e, "Failed to start aggregation");
                        None
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::sink::{LogDocumentSink, LogMetricSink};

    #[tokio::test]
    async fn test_processor_per_kind() {
        let mut provider = DefaultProcessorProvider::new(
            Arc::new(LogMetricSink),
            Arc::new(LogDocumentSink),
            AggregationSettings::default(),
        )
        .unwrap();
        assert!(provider.try_get_processor("logs.p.e").is_some());
        assert!(provider.try_get_processor("metrics.p.e.s").is_some());
        assert!(provider.try_get_processor("__consumer_offsets").is_none());
        assert!(provider.try_get_processor("audit.p.e").is_none());

        let mut traces = provider.try_get_processor("traces.p.e").unwrap();
        traces.shutdown().await.unwrap();
        let mut app_events = provider.try_get_processor("app-events.p.e").unwrap();
        app_events.shutdown().await.unwrap();
    }

    #[test]
    fn test_invalid_aggregation_settings_are_rejected() {
        let result = DefaultProcessorProvider::new(
            Arc::new(LogMetricSink),
            Arc::new(LogDocumentSink),
            AggregationSettings {
                period: std::time::Duration::ZERO,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(Error::Config(_))));

        let result = DefaultProcessorProvider::new(
            Arc::new(LogMetricSink),
            Arc::new(LogDocumentSink),
            AggregationSettings {
                flush_interval: std::time::Duration::ZERO,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
