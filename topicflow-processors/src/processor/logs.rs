use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use topicflow_core::{EventProcessor, Record};
use tracing::{debug, warn};

use crate::processor::decode;
use crate::routing::RoutingKey;
use crate::sink::{Document, DocumentSink};

const TIMESTAMP_FIELD: &str = "timestamp";

/// Indexes JSON log documents into a daily index per routing key,
/// `<routing key with '.' replaced by '-'>-<yyyy.MM.dd>`.
pub struct LogsProcessor {
    index_prefix: String,
    sink: Arc<dyn DocumentSink>,
}

impl LogsProcessor {
    pub fn new(routing_key: &RoutingKey, sink: Arc<dyn DocumentSink>) -> Self {
        Self {
            index_prefix: routing_key.as_str().replace('.', "-"),
            sink,
        }
    }

    /// Index of a document written at `timestamp`.
    pub fn index_name(&self, timestamp: DateTime<Utc>) -> String {
        format!("{}-{}", self.index_prefix, timestamp.format("%Y.%m.%d"))
    }

    fn document(&self, record: &Record) -> Option<Document> {
        let body: Value = decode(record)?;
        if !body.is_object() {
            warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Skipping log record that is not a JSON object"
            );
            return None;
        }
        let timestamp = body
            .get(TIMESTAMP_FIELD)
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map_or(record.timestamp, |ts| ts.with_timezone(&Utc));
        Some(Document {
            index: self.index_name(timestamp),
            body,
        })
    }
}

#[async_trait]
impl EventProcessor for LogsProcessor {
    async fn process(&mut self, batch: Vec<Record>) -> topicflow_core::Result<()> {
        let documents: Vec<Document> = batch.iter().filter_map(|r| self.document(r)).collect();
        if documents.is_empty() {
            return Ok(());
        }
        debug!(count = documents.len(), "Indexing log documents");
        self.sink.index(documents).await?;
        Ok(())
    }
}
