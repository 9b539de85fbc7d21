//! [`EventProcessor`](topicflow_core::EventProcessor)s of the known event kinds.

mod aggregating;
mod logs;
mod metrics;

pub use aggregating::AggregatingProcessor;
pub use logs::LogsProcessor;
pub use metrics::MetricsProcessor;

use serde::de::DeserializeOwned;
use topicflow_core::Record;
use tracing::warn;

use crate::metrics::{processor_metrics, routing_key_labels};

/// Decodes a JSON payload. Undecodable records are logged, counted and skipped so that a
/// poison record never stalls its pipeline.
pub(crate) fn decode<T: DeserializeOwned>(record: &Record) -> Option<T> {
    match serde_json::from_slice(&record.value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            processor_metrics()
                .records_skipped
                .get_or_create(&routing_key_labels(&record.topic))
                .inc();
            warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Skipping undecodable record"
            );
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use bytes::Bytes;
    use chrono::{DateTime, Utc};

    use super::*;

    pub(crate) fn record(topic: &str, offset: i64, value: impl Into<Bytes>, timestamp: DateTime<Utc>) -> Record {
        Record {
            topic: topic.to_string(),
            partition: 0,
            offset,
            key: None,
            value: value.into(),
            timestamp,
        }
    }

    #[test]
    fn test_decode_skips_garbage() {
        let ok = record("metrics.a.b", 0, r#"{"timestamp":"2026-10-17T10:00:00Z"}"#, Utc::now());
        assert!(decode::<crate::event::MetricEvent>(&ok).is_some());

        let garbage = record("metrics.a.b", 1, "not json", Utc::now());
        assert!(decode::<crate::event::MetricEvent>(&garbage).is_none());
    }
}
