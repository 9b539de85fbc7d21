use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use topicflow_core::{AutoOffsetReset, ConsumerSettings, Error, Result, RevokedRecordPolicy};
use topicflow_kafka::KafkaSettings;
use topicflow_processors::AggregationSettings;

const ENV_BROKERS: &str = "TOPICFLOW_BROKERS";
const ENV_CONSUMER_GROUP: &str = "TOPICFLOW_CONSUMER_GROUP";
const ENV_CLIENT_ID: &str = "TOPICFLOW_CLIENT_ID";
const ENV_AUTO_OFFSET_RESET: &str = "TOPICFLOW_AUTO_OFFSET_RESET";
const ENV_POLL_INTERVAL_MS: &str = "TOPICFLOW_POLL_INTERVAL_MS";
const ENV_COMMIT_INTERVAL_MS: &str = "TOPICFLOW_COMMIT_INTERVAL_MS";
const ENV_BATCH_SIZE: &str = "TOPICFLOW_BATCH_SIZE";
const ENV_BATCH_TIMEOUT_MS: &str = "TOPICFLOW_BATCH_TIMEOUT_MS";
const ENV_QUEUE_ALARM_THRESHOLD: &str = "TOPICFLOW_QUEUE_ALARM_THRESHOLD";
const ENV_PAUSE_THRESHOLD: &str = "TOPICFLOW_PAUSE_THRESHOLD";
const ENV_REVOKED_RECORDS: &str = "TOPICFLOW_REVOKED_RECORDS";
const ENV_STOP_TIMEOUT_SECS: &str = "TOPICFLOW_STOP_TIMEOUT_SECS";
const ENV_AGGREGATION_PERIOD_SECS: &str = "TOPICFLOW_AGGREGATION_PERIOD_SECS";
const ENV_AGGREGATION_COOLDOWN_SECS: &str = "TOPICFLOW_AGGREGATION_COOLDOWN_SECS";
const ENV_FUTURE_TOLERANCE_SECS: &str = "TOPICFLOW_FUTURE_TOLERANCE_SECS";
const ENV_FLUSH_INTERVAL_SECS: &str = "TOPICFLOW_FLUSH_INTERVAL_SECS";
const ENV_METRICS_PORT: &str = "TOPICFLOW_METRICS_PORT";
/// Prefix of raw librdkafka options, `TOPICFLOW_KAFKA_FETCH_MIN_BYTES` sets `fetch.min.bytes`.
const ENV_KAFKA_PREFIX: &str = "TOPICFLOW_KAFKA_";

const DEFAULT_METRICS_PORT: u16 = 2469;

/// Process settings, read from `TOPICFLOW_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub(crate) consumer: ConsumerSettings,
    pub(crate) aggregation: AggregationSettings,
    pub(crate) kafka_raw_config: HashMap<String, String>,
    pub(crate) metrics_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            consumer: ConsumerSettings::default(),
            aggregation: AggregationSettings::default(),
            kafka_raw_config: HashMap::new(),
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

impl Settings {
    pub(crate) fn kafka(&self) -> KafkaSettings {
        let mut kafka = KafkaSettings::from(&self.consumer);
        kafka.kafka_raw_config = self.kafka_raw_config.clone();
        kafka
    }
}

fn parse<T>(env_vars: &HashMap<String, String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    env_vars
        .get(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| {
                Error::Config(format!("Parsing {name}(set to '{value}'): {e}"))
            })
        })
        .transpose()
}

fn parse_revoked_records(value: &str) -> Result<RevokedRecordPolicy> {
    match value.trim().to_lowercase().as_str() {
        "discard" => Ok(RevokedRecordPolicy::Discard),
        "process" => Ok(RevokedRecordPolicy::Process),
        other => Err(Error::Config(format!(
            "Parsing {ENV_REVOKED_RECORDS}(set to '{other}'): expected 'discard' or 'process'"
        ))),
    }
}

impl TryFrom<HashMap<String, String>> for Settings {
    type Error = Error;

    fn try_from(env_vars: HashMap<String, String>) -> Result<Self> {
        let mut settings = Settings::default();
        let consumer = &mut settings.consumer;

        if let Some(brokers) = env_vars.get(ENV_BROKERS) {
            let brokers: Vec<String> = brokers
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string)
                .collect();
            if brokers.is_empty() {
                return Err(Error::Config(format!("{ENV_BROKERS} is set but empty")));
            }
            consumer.brokers = brokers;
        }
        if let Some(group) = env_vars.get(ENV_CONSUMER_GROUP) {
            consumer.consumer_group = group.to_owned();
        }
        if let Some(client_id) = env_vars.get(ENV_CLIENT_ID) {
            consumer.client_id = client_id.to_owned();
        }
        if let Some(reset) = parse::<AutoOffsetReset>(&env_vars, ENV_AUTO_OFFSET_RESET)? {
            consumer.auto_offset_reset = reset;
        }
        if let Some(ms) = parse::<u64>(&env_vars, ENV_POLL_INTERVAL_MS)? {
            consumer.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&env_vars, ENV_COMMIT_INTERVAL_MS)? {
            consumer.commit_interval = Duration::from_millis(ms);
        }

        let host = &mut consumer.host;
        if let Some(batch_size) = parse(&env_vars, ENV_BATCH_SIZE)? {
            host.batch_size = batch_size;
        }
        if let Some(ms) = parse::<u64>(&env_vars, ENV_BATCH_TIMEOUT_MS)? {
            host.batch_timeout = Duration::from_millis(ms);
        }
        if let Some(threshold) = parse(&env_vars, ENV_QUEUE_ALARM_THRESHOLD)? {
            host.queue_alarm_threshold = threshold;
        }
        if let Some(threshold) = parse(&env_vars, ENV_PAUSE_THRESHOLD)? {
            host.pause_threshold = Some(threshold);
        }
        if let Some(policy) = env_vars.get(ENV_REVOKED_RECORDS) {
            host.revoked_records = parse_revoked_records(policy)?;
        }
        if let Some(secs) = parse::<u64>(&env_vars, ENV_STOP_TIMEOUT_SECS)? {
            host.stop_timeout = Duration::from_secs(secs);
        }

        let aggregation = &mut settings.aggregation;
        if let Some(secs) = parse::<u64>(&env_vars, ENV_AGGREGATION_PERIOD_SECS)? {
            aggregation.period = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&env_vars, ENV_AGGREGATION_COOLDOWN_SECS)? {
            aggregation.cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&env_vars, ENV_FUTURE_TOLERANCE_SECS)? {
            aggregation.future_tolerance = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&env_vars, ENV_FLUSH_INTERVAL_SECS)? {
            aggregation.flush_interval = Duration::from_secs(secs);
        }
        aggregation
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        if let Some(port) = parse(&env_vars, ENV_METRICS_PORT)? {
            settings.metrics_port = port;
        }

        for (name, value) in &env_vars {
            if let Some(option) = name.strip_prefix(ENV_KAFKA_PREFIX) {
                let option = option.to_lowercase().replace('_', ".");
                settings.kafka_raw_config.insert(option, value.to_owned());
            }
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::try_from(HashMap::new()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.consumer.auto_offset_reset, AutoOffsetReset::Latest);
        assert_eq!(settings.metrics_port, DEFAULT_METRICS_PORT);
    }

    #[test]
    fn test_settings_from_env() {
        let settings = Settings::try_from(env(&[
            (ENV_BROKERS, "kafka-1:9092, kafka-2:9092"),
            (ENV_CONSUMER_GROUP, "telemetry"),
            (ENV_AUTO_OFFSET_RESET, "Earliest"),
            (ENV_COMMIT_INTERVAL_MS, "500"),
            (ENV_BATCH_SIZE, "200"),
            (ENV_PAUSE_THRESHOLD, "5000"),
            (ENV_REVOKED_RECORDS, "process"),
            (ENV_AGGREGATION_PERIOD_SECS, "30"),
            (ENV_METRICS_PORT, "9090"),
            ("TOPICFLOW_KAFKA_FETCH_MIN_BYTES", "1024"),
        ]))
        .unwrap();

        assert_eq!(
            settings.consumer.brokers,
            vec!["kafka-1:9092".to_string(), "kafka-2:9092".to_string()]
        );
        assert_eq!(settings.consumer.consumer_group, "telemetry");
        assert_eq!(settings.consumer.auto_offset_reset, AutoOffsetReset::Earliest);
        assert_eq!(settings.consumer.commit_interval, Duration::from_millis(500));
        assert_eq!(settings.consumer.host.batch_size, 200);
        assert_eq!(settings.consumer.host.pause_threshold, Some(5000));
        assert_eq!(
            settings.consumer.host.revoked_records,
            RevokedRecordPolicy::Process
        );
        assert_eq!(settings.aggregation.period, Duration::from_secs(30));
        assert_eq!(settings.metrics_port, 9090);

        let kafka = settings.kafka();
        assert_eq!(kafka.consumer_group, "telemetry");
        assert_eq!(
            kafka.kafka_raw_config.get("fetch.min.bytes"),
            Some(&"1024".to_string())
        );
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = Settings::try_from(env(&[(ENV_BATCH_SIZE, "many")])).unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains(ENV_BATCH_SIZE)));

        let err = Settings::try_from(env(&[(ENV_REVOKED_RECORDS, "keep")])).unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains(ENV_REVOKED_RECORDS)));

        let err = Settings::try_from(env(&[(ENV_AUTO_OFFSET_RESET, "middle")])).unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains(ENV_AUTO_OFFSET_RESET)));

        assert!(Settings::try_from(env(&[(ENV_BROKERS, " , ")])).is_err());
        assert!(Settings::try_from(env(&[(ENV_FLUSH_INTERVAL_SECS, "0")])).is_err());
    }
}
