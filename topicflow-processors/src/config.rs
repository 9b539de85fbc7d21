use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_PERIOD_SECS: u64 = 60;
const DEFAULT_COOLDOWN_SECS: u64 = 60;
const DEFAULT_FUTURE_TOLERANCE_SECS: u64 = 300;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;

/// Settings of the windowed aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSettings {
    /// Width of a time bin.
    pub period: Duration,
    /// How long a bin stays open after its period ended, i.e. how late an observation may be.
    pub cooldown: Duration,
    /// How far ahead of the local clock an observation may be.
    pub future_tolerance: Duration,
    /// How often closed bins are flushed.
    pub flush_interval: Duration,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(DEFAULT_PERIOD_SECS),
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            future_tolerance: Duration::from_secs(DEFAULT_FUTURE_TOLERANCE_SECS),
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
        }
    }
}

impl AggregationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.period.as_millis() == 0 {
            return Err(Error::Config("aggregation period must be at least 1ms".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::Config("flush interval must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(AggregationSettings::default().validate().is_ok());

        let settings = AggregationSettings {
            period: Duration::from_micros(10),
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let settings = AggregationSettings {
            flush_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
