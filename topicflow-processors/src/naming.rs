//! Hierarchical (graphite style) metric names.
//!
//! A name is `<project>.<environment>.<service>[.<tag values>].<value name>`. Missing routing
//! key parts become `Unknown`. Tag values follow in a fixed order: `type`, `host` (lower
//! cased), `operationName`, `statusCode`, then every other tag ordered by key; tags with an
//! empty key or value are left out. Every character outside `[A-Za-z0-9]` is replaced by `_`.

use crate::event::{Metric, MetricEvent, Tags};
use crate::routing::RoutingKey;

pub const UNKNOWN: &str = "Unknown";

pub const TYPE_TAG: &str = "type";
pub const HOST_TAG: &str = "host";
pub const OPERATION_TAG: &str = "operationName";
pub const STATUS_TAG: &str = "statusCode";

const ORDERED_TAGS: [&str; 4] = [TYPE_TAG, HOST_TAG, OPERATION_TAG, STATUS_TAG];

/// Replaces every character outside `[A-Za-z0-9]`, one `_` per character.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn part(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => sanitize(v),
        _ => UNKNOWN.to_string(),
    }
}

fn tag_value(key: &str, value: &str) -> String {
    if key == HOST_TAG {
        sanitize(&value.to_lowercase())
    } else {
        sanitize(value)
    }
}

fn is_set(key: &str, value: &str) -> bool {
    !key.is_empty() && !value.is_empty()
}

/// Prefix of every metric name of an entity.
pub fn build_prefix(
    project: Option<&str>,
    environment: Option<&str>,
    service: Option<&str>,
    tags: &Tags,
) -> String {
    let mut segments = vec![part(project), part(environment), part(service)];

    for key in ORDERED_TAGS {
        if let Some(value) = tags.get(key).filter(|v| is_set(key, v.as_str())) {
            segments.push(tag_value(key, value));
        }
    }
    // tags are ordered by key already
    for (key, value) in tags {
        if ORDERED_TAGS.contains(&key.as_str()) || !is_set(key, value) {
            continue;
        }
        segments.push(tag_value(key, value));
    }
    segments.join(".")
}

/// Full name of a value under a prefix.
pub fn build_name(prefix: &str, name: &str) -> String {
    format!("{prefix}.{}", sanitize(name))
}

/// Turns metric events of one routing key into named metrics.
#[derive(Debug, Clone)]
pub struct MetricConverter {
    project: String,
    environment: String,
    service: Option<String>,
}

impl MetricConverter {
    pub fn new(routing_key: &RoutingKey) -> Self {
        Self {
            project: routing_key.project().to_string(),
            environment: routing_key.environment().to_string(),
            service: routing_key.service().map(str::to_string),
        }
    }

    /// One metric per value of the event.
    pub fn convert(&self, event: &MetricEvent) -> Vec<Metric> {
        let prefix = build_prefix(
            Some(&self.project),
            Some(&self.environment),
            self.service.as_deref(),
            &event.tags,
        );
        event
            .values
            .iter()
            .map(|(name, value)| Metric {
                name: build_name(&prefix, name),
                tags: event.tags.clone(),
                value: *value,
                timestamp: event.timestamp,
            })
            .collect()
    }
}
