use std::path::PathBuf;

use serde::Deserialize;

use crate::buffer::PartitionKey;
use crate::error::EngineError;

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    /// Broker consumer (event ingestion pipeline).
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Line-delimited JSON broker endpoint used by the server binary.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// In-memory log repository.
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "omnilogger".into()
}

/// What to do with an event whose handler returned an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicyKind {
    /// Log and acknowledge. The event is not redelivered.
    #[default]
    AckAlways,
    /// Write the event to the dead-letter file, then acknowledge.
    DeadLetter,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConsumerConfig {
    /// When false the pipeline never subscribes.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Buffer capacity: maximum number of unacknowledged messages.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Number of sequential dispatcher lanes.
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    /// Key used to pick a lane (only meaningful with `lanes > 1`).
    #[serde(default)]
    pub partition_by: PartitionKey,
    #[serde(default)]
    pub failure_policy: FailurePolicyKind,
    /// Required with `failure-policy = "dead-letter"`.
    #[serde(default)]
    pub dead_letter_path: Option<PathBuf>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            group: String::new(),
            topics: Vec::new(),
            max_records: default_max_records(),
            lanes: default_lanes(),
            partition_by: PartitionKey::default(),
            failure_policy: FailurePolicyKind::default(),
            dead_letter_path: None,
        }
    }
}

fn default_max_records() -> usize {
    100
}
fn default_lanes() -> usize {
    1
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_records == 0 {
            return Err(EngineError::Config(
                "consumer.max-records must be at least 1".into(),
            ));
        }
        if self.lanes == 0 {
            return Err(EngineError::Config("consumer.lanes must be at least 1".into()));
        }
        if self.lanes > self.max_records {
            return Err(EngineError::Config(format!(
                "consumer.lanes ({}) cannot exceed consumer.max-records ({})",
                self.lanes, self.max_records
            )));
        }
        if self.enabled && self.topics.is_empty() {
            return Err(EngineError::Config(
                "consumer.topics must not be empty when the consumer is enabled".into(),
            ));
        }
        if self.failure_policy == FailurePolicyKind::DeadLetter && self.dead_letter_path.is_none()
        {
            return Err(EngineError::Config(
                "consumer.dead-letter-path is required with failure-policy = \"dead-letter\""
                    .into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:9400".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    #[serde(default = "default_store_records")]
    pub max_records: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_records: default_store_records(),
        }
    }
}

fn default_store_records() -> usize {
    100_000
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: AppConfig =
            toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.consumer.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = AppConfig::parse(
            r#"
            [service]
            name = "audit"

            [consumer]
            enabled = true
            group = "omnilogger"
            topics = ["logs", "audit"]
            max-records = 50
            lanes = 4
            partition-by = "event-id"
            failure-policy = "dead-letter"
            dead-letter-path = "/tmp/dlq.jsonl"

            [broker]
            listen = "0.0.0.0:9500"

            [store]
            max-records = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.service.name, "audit");
        assert!(config.consumer.enabled);
        assert_eq!(config.consumer.topics, vec!["logs", "audit"]);
        assert_eq!(config.consumer.max_records, 50);
        assert_eq!(config.consumer.lanes, 4);
        assert_eq!(config.consumer.partition_by, PartitionKey::EventId);
        assert_eq!(config.consumer.failure_policy, FailurePolicyKind::DeadLetter);
        assert_eq!(
            config.consumer.dead_letter_path,
            Some(PathBuf::from("/tmp/dlq.jsonl"))
        );
        assert_eq!(config.broker.listen, "0.0.0.0:9500");
        assert_eq!(config.store.max_records, 10);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert!(!config.consumer.enabled);
        assert_eq!(config.consumer.max_records, 100);
        assert_eq!(config.consumer.lanes, 1);
        assert_eq!(config.consumer.partition_by, PartitionKey::EventType);
        assert_eq!(config.consumer.failure_policy, FailurePolicyKind::AckAlways);
        assert_eq!(config.service.name, "omnilogger");
        assert_eq!(config.broker.listen, "127.0.0.1:9400");
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = AppConfig::parse("[consumer]\nmax-records = 0\n").unwrap_err();
        assert!(err.to_string().contains("max-records"));
    }

    #[test]
    fn rejects_more_lanes_than_capacity() {
        let err = AppConfig::parse("[consumer]\nmax-records = 2\nlanes = 3\n").unwrap_err();
        assert!(err.to_string().contains("lanes"));
    }

    #[test]
    fn enabled_consumer_needs_topics() {
        assert!(AppConfig::parse("[consumer]\nenabled = true\n").is_err());
    }

    #[test]
    fn dead_letter_policy_needs_path() {
        let err = AppConfig::parse("[consumer]\nfailure-policy = \"dead-letter\"\n").unwrap_err();
        assert!(err.to_string().contains("dead-letter-path"));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = AppConfig::load("/nonexistent/omnilog.toml").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
