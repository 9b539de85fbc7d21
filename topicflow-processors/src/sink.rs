//! Contracts of the downstream clients the processors hand their output to. Delivery,
//! batching and retries towards the external systems are the sink's business.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::event::Metric;

/// A document to be indexed by a search backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub index: String,
    pub body: serde_json::Value,
}

/// Metrics transport.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn send(&self, metrics: Vec<Metric>) -> Result<()>;
}

/// Indexing backend.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn index(&self, documents: Vec<Document>) -> Result<()>;
}

/// Writes metrics to the log.
#[derive(Debug, Default, Clone)]
pub struct LogMetricSink;

#[async_trait]
impl MetricSink for LogMetricSink {
    async fn send(&self, metrics: Vec<Metric>) -> Result<()> {
        info!(count = metrics.len(), "Sending metrics");
        for metric in &metrics {
            debug!(
                name = %metric.name,
                value = metric.value,
                timestamp = %metric.timestamp,
                "Metric"
            );
        }
        Ok(())
    }
}

/// Writes documents to the log.
#[derive(Debug, Default, Clone)]
pub struct LogDocumentSink;

#[async_trait]
impl DocumentSink for LogDocumentSink {
    async fn index(&self, documents: Vec<Document>) -> Result<()> {
        info!(count = documents.len(), "Indexing documents");
        for document in &documents {
            debug!(index = %document.index, body = %document.body, "Document");
        }
        Ok(())
    }
}
