//! Kafka change source.
//!
//! One `StreamConsumer` per pipeline, subscribed to a single topic with
//! automatic commits disabled: positions are committed by the engine after
//! the batch they cover has been written.

use std::collections::BTreeMap;
use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};

use cdc_api::{BoxFuture, BusMessage, CdcError, ChangeSource, Position, SourceFactory};

// ═══════════════════════════════════════════════════════════════
//  KafkaSourceConfig
// ═══════════════════════════════════════════════════════════════

fn default_group_id() -> String {
    "market-cdc".into()
}

fn default_offset_reset() -> String {
    "earliest".into()
}

fn default_security_protocol() -> String {
    "SASL_SSL".into()
}

fn default_sasl_mechanism() -> String {
    "PLAIN".into()
}

fn default_session_timeout_ms() -> u64 {
    45_000
}

/// `[kafka]` section.
#[derive(Clone, serde::Deserialize)]
pub struct KafkaSourceConfig {
    pub bootstrap_servers: String,

    /// Prefix of the consumer group; each pipeline uses `<group_id>.<table>`.
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Where a group without committed positions starts.
    #[serde(default = "default_offset_reset")]
    pub offset_reset: String,

    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,

    #[serde(default = "default_sasl_mechanism")]
    pub sasl_mechanism: String,

    #[serde(default)]
    pub sasl_username: Option<String>,

    #[serde(default)]
    pub sasl_password: Option<String>,

    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Extra librdkafka properties, applied last.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl std::fmt::Debug for KafkaSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSourceConfig")
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("group_id", &self.group_id)
            .field("offset_reset", &self.offset_reset)
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("sasl_username", &self.sasl_username)
            .field("sasl_password", &self.sasl_password.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl KafkaSourceConfig {
    pub fn uses_sasl(&self) -> bool {
        self.security_protocol.to_ascii_uppercase().starts_with("SASL")
    }

    pub fn validate(&self) -> Result<(), CdcError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(CdcError::config("kafka.bootstrap_servers is empty"));
        }
        if !matches!(self.offset_reset.as_str(), "earliest" | "latest") {
            return Err(CdcError::config(format!(
                "kafka.offset_reset must be 'earliest' or 'latest', got '{}'",
                self.offset_reset
            )));
        }
        if self.uses_sasl() && (self.sasl_username.is_none() || self.sasl_password.is_none()) {
            return Err(CdcError::config(format!(
                "kafka.security_protocol is {} but SASL credentials are missing",
                self.security_protocol
            )));
        }
        Ok(())
    }

    pub fn group_for(&self, table: &str) -> String {
        format!("{}.{table}", self.group_id)
    }

    /// Client properties for a consumer in `group`.
    pub fn to_client_config(&self, group: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.offset_reset)
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("security.protocol", &self.security_protocol);

        if self.uses_sasl() {
            config.set("sasl.mechanism", &self.sasl_mechanism);
            if let Some(ref username) = self.sasl_username {
                config.set("sasl.username", username);
            }
            if let Some(ref password) = self.sasl_password {
                config.set("sasl.password", password);
            }
        }

        for (key, value) in &self.properties {
            config.set(key, value);
        }
        config
    }
}

/// Map a client error onto the engine's error classes.
pub fn classify(e: KafkaError) -> CdcError {
    match e.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed,
        ) => CdcError::auth(e.to_string()),
        _ => match e {
            KafkaError::ClientCreation(msg) => CdcError::config(format!("kafka client: {msg}")),
            KafkaError::ClientConfig(_, desc, key, value) => {
                CdcError::config(format!("kafka property {key}={value}: {desc}"))
            }
            other => CdcError::unavailable(other.to_string()),
        },
    }
}

fn to_bus_message(msg: &BorrowedMessage<'_>) -> BusMessage {
    BusMessage {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        payload: msg.payload().map(<[u8]>::to_vec),
    }
}

// ═══════════════════════════════════════════════════════════════
//  KafkaChangeSource
// ═══════════════════════════════════════════════════════════════

pub struct KafkaChangeSource {
    consumer: StreamConsumer,
    topic: String,
    linger: Duration,
}

impl ChangeSource for KafkaChangeSource {
    fn poll_batch(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<BusMessage>, CdcError>> {
        Box::pin(async move {
            let mut batch = Vec::new();

            let first = match tokio::time::timeout(timeout, self.consumer.recv()).await {
                Err(_elapsed) => return Ok(batch),
                Ok(received) => received.map(|m| to_bus_message(&m)).map_err(classify)?,
            };
            batch.push(first);

            while batch.len() < max {
                match tokio::time::timeout(self.linger, self.consumer.recv()).await {
                    Err(_elapsed) => break,
                    Ok(Ok(msg)) => batch.push(to_bus_message(&msg)),
                    Ok(Err(e)) => {
                        // Keep the messages already received.
                        tracing::warn!(topic = %self.topic, error = %e, "kafka receive error");
                        break;
                    }
                }
            }
            Ok(batch)
        })
    }

    fn commit(&mut self, positions: Vec<Position>) -> BoxFuture<'_, Result<(), CdcError>> {
        Box::pin(async move {
            if positions.is_empty() {
                return Ok(());
            }
            let mut tpl = TopicPartitionList::new();
            for p in positions {
                tpl.add_partition_offset(&self.topic, p.partition, Offset::Offset(p.next_offset))
                    .map_err(classify)?;
            }
            self.consumer.commit(&tpl, CommitMode::Sync).map_err(classify)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.consumer.unsubscribe();
            tracing::info!(topic = %self.topic, "kafka consumer unsubscribed");
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  KafkaSourceFactory
// ═══════════════════════════════════════════════════════════════

pub struct KafkaSourceFactory {
    config: KafkaSourceConfig,
    linger: Duration,
}

impl KafkaSourceFactory {
    /// `linger` bounds the wait for each message after the first of a batch.
    pub fn new(config: KafkaSourceConfig, linger: Duration) -> Result<Self, CdcError> {
        config.validate()?;
        Ok(Self { config, linger })
    }
}

impl SourceFactory for KafkaSourceFactory {
    fn open<'a>(
        &'a self,
        topic: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ChangeSource>, CdcError>> {
        Box::pin(async move {
            let group = self.config.group_for(table);
            let consumer: StreamConsumer = self
                .config
                .to_client_config(&group)
                .create()
                .map_err(classify)?;
            consumer.subscribe(&[topic]).map_err(classify)?;

            tracing::info!(topic, group = %group, "kafka consumer subscribed");
            let source: Box<dyn ChangeSource> = Box::new(KafkaChangeSource {
                consumer,
                topic: topic.to_string(),
                linger: self.linger,
            });
            Ok(source)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extra: &str) -> KafkaSourceConfig {
        toml::from_str(&format!(
            "bootstrap_servers = \"pkc-1.eu-west-1.aws.confluent.cloud:9092\"\n{extra}"
        ))
        .unwrap()
    }

    #[test]
    fn defaults_match_managed_cluster_setup() {
        let cfg = config("sasl_username = \"key\"\nsasl_password = \"secret\"");
        assert_eq!(cfg.group_id, "market-cdc");
        assert_eq!(cfg.offset_reset, "earliest");
        assert_eq!(cfg.security_protocol, "SASL_SSL");
        assert_eq!(cfg.sasl_mechanism, "PLAIN");
        cfg.validate().unwrap();

        let client = cfg.to_client_config(&cfg.group_for("klines"));
        assert_eq!(client.get("group.id"), Some("market-cdc.klines"));
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client.get("sasl.mechanism"), Some("PLAIN"));
        assert_eq!(client.get("sasl.username"), Some("key"));
    }

    #[test]
    fn plaintext_skips_sasl_and_applies_properties() {
        let cfg = config(
            "security_protocol = \"PLAINTEXT\"\n[properties]\n\"fetch.min.bytes\" = \"1024\"",
        );
        cfg.validate().unwrap();
        let client = cfg.to_client_config("g");
        assert_eq!(client.get("sasl.mechanism"), None);
        assert_eq!(client.get("fetch.min.bytes"), Some("1024"));
    }

    #[test]
    fn missing_credentials_are_a_config_error() {
        let err = config("").validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(config("security_protocol = \"PLAINTEXT\"\noffset_reset = \"newest\"").validate().is_err());
    }

    #[test]
    fn password_is_not_printed() {
        let cfg = config("sasl_username = \"key\"\nsasl_password = \"hunter2\"");
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }

    #[test]
    fn authorization_errors_are_fatal() {
        let err = classify(KafkaError::MessageConsumption(RDKafkaErrorCode::TopicAuthorizationFailed));
        assert!(err.is_fatal());
        let err = classify(KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure));
        assert!(err.is_retryable());
    }
}
