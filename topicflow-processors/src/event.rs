use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag set identifying an entity, e.g. `{service: "a", host: "b"}`.
pub type Tags = BTreeMap<String, String>;

/// A set of named measurements of one entity at one point in time. It is both the payload of
/// `metrics` and `app-events` records and the derived event a closed time bin turns into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

/// A single named value ready for a metrics transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub tags: Tags,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}
