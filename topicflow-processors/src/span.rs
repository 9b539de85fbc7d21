//! Tracing spans, as published on `traces` topics, and their request metric.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{MetricEvent, Tags};
use crate::naming::{HOST_TAG, OPERATION_TAG, STATUS_TAG, TYPE_TAG};

/// Annotation names of spans.
pub const HOST_ANNOTATION: &str = "host";
pub const HTTP_CODE_ANNOTATION: &str = "http.code";
pub const OPERATION_ANNOTATION: &str = "operation";

/// Value name of the span duration, in milliseconds.
pub const DURATION_VALUE: &str = "duration";

const REQUESTS_TYPE: &str = "requests";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    #[serde(default)]
    pub parent_span_id: Option<Uuid>,
    pub begin_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub end_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl Span {
    /// First 8 hex digits of the trace id, the partition key of trace stores.
    pub fn trace_id_prefix(&self) -> String {
        let mut prefix = self.trace_id.simple().to_string();
        prefix.truncate(8);
        prefix
    }

    /// The request observation of a finished span: its duration at the end timestamp, tagged
    /// with host, status and operation when annotated. `None` for unfinished spans.
    pub fn to_metric_event(&self) -> Option<MetricEvent> {
        let end = self.end_timestamp?;

        let mut tags = Tags::new();
        let annotated = [
            (HOST_ANNOTATION, HOST_TAG),
            (HTTP_CODE_ANNOTATION, STATUS_TAG),
            (OPERATION_ANNOTATION, OPERATION_TAG),
        ];
        for (annotation, tag) in annotated {
            if let Some(value) = self.annotations.get(annotation) {
                tags.insert(tag.to_string(), value.clone());
            }
        }
        tags.insert(TYPE_TAG.to_string(), REQUESTS_TYPE.to_string());

        let duration = (end - self.begin_timestamp).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0;
        Some(MetricEvent {
            timestamp: end,
            tags,
            values: [(DURATION_VALUE.to_string(), duration)].into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn span(end: Option<DateTime<Utc>>, annotations: &[(&str, &str)]) -> Span {
        Span {
            trace_id: Uuid::parse_str("5f2c9a1e-0d4b-4c1e-9f7a-3b2d1c0e9f8a").unwrap(),
            span_id: Uuid::new_v4(),
            parent_span_id: None,
            begin_timestamp: DateTime::from_timestamp(1_760_000_000, 0).unwrap(),
            end_timestamp: end,
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_trace_id_prefix() {
        assert_eq!(span(None, &[]).trace_id_prefix(), "5f2c9a1e");
    }

    #[test]
    fn test_finished_span_becomes_request_observation() {
        let begin = DateTime::from_timestamp(1_760_000_000, 0).unwrap();
        let end = begin + TimeDelta::milliseconds(1250);
        let span = span(
            Some(end),
            &[("host", "web-01"), ("http.code", "200"), ("operation", "GET /cart"), ("user", "x")],
        );

        let event = span.to_metric_event().unwrap();
        assert_eq!(event.timestamp, end);
        assert_eq!(event.values[DURATION_VALUE], 1250.0);
        assert_eq!(event.tags[TYPE_TAG], "requests");
        assert_eq!(event.tags[HOST_TAG], "web-01");
        assert_eq!(event.tags[STATUS_TAG], "200");
        assert_eq!(event.tags[OPERATION_TAG], "GET /cart");
        // other annotations are not tags
        assert_eq!(event.tags.len(), 4);
    }

    #[test]
    fn test_unfinished_span_is_skipped() {
        assert!(span(None, &[]).to_metric_event().is_none());
    }

    #[test]
    fn test_decode() {
        let json = r#"{
            "traceId": "5f2c9a1e-0d4b-4c1e-9f7a-3b2d1c0e9f8a",
            "spanId": "0b5d5c1a-8a3e-4f0e-9b57-7d2c8e2a9c11",
            "beginTimestamp": "2026-10-17T10:00:00Z",
            "endTimestamp": "2026-10-17T10:00:00.5Z",
            "annotations": {"host": "a"}
        }"#;
        let span: Span = serde_json::from_str(json).unwrap();
        assert_eq!(span.parent_span_id, None);
        assert_eq!(span.to_metric_event().unwrap().values[DURATION_VALUE], 500.0);
    }
}
