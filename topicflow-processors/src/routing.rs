//! Topic names double as routing keys: `<kind>.<project>.<environment>[.<service>]`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The kind of payload a topic carries, which decides its processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Structured log documents.
    Logs,
    /// Ready made metric events.
    Metrics,
    /// Application events aggregated into metrics.
    AppEvents,
    /// Tracing spans aggregated into request metrics.
    Traces,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Logs => "logs",
            EventKind::Metrics => "metrics",
            EventKind::AppEvents => "app-events",
            EventKind::Traces => "traces",
        }
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "logs" => Ok(EventKind::Logs),
            "metrics" => Ok(EventKind::Metrics),
            "app-events" => Ok(EventKind::AppEvents),
            "traces" => Ok(EventKind::Traces),
            other => Err(Error::RoutingKey(format!("unknown event kind '{other}'"))),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKey {
    raw: String,
    kind: EventKind,
    project: String,
    environment: String,
    service: Option<String>,
}

impl RoutingKey {
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('.').collect();
        if !(3..=4).contains(&parts.len()) {
            return Err(Error::RoutingKey(format!(
                "'{raw}' is not <kind>.<project>.<environment>[.<service>]"
            )));
        }
        let kind = parts[0].parse()?;
        Ok(Self {
            raw: raw.to_string(),
            kind,
            project: parts[1].to_string(),
            environment: parts[2].to_string(),
            service: parts.get(3).map(|s| s.to_string()),
        })
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
