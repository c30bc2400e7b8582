use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use cdc_api::catalog::DEFAULT_NAMESPACE;
use cdc_engine::config::default_pipelines;
use cdc_engine::{EngineConfig, PipelineConfig};
use cdc_source_kafka::KafkaSourceConfig;
use cdc_storage_cassandra::CassandraConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "cdc-server", about = "Replicates market-data change events from Kafka into Cassandra")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the replication pipelines until interrupted
    Run(RunArgs),
    /// Print CREATE TABLE statements for the replicated tables
    Ddl(DdlArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "CDC_CONFIG")]
    pub config: String,

    #[arg(long, env = "CDC_KAFKA_USERNAME", hide_env_values = true)]
    pub kafka_username: Option<String>,

    #[arg(long, env = "CDC_KAFKA_PASSWORD", hide_env_values = true)]
    pub kafka_password: Option<String>,

    #[arg(long, env = "CDC_CASSANDRA_USERNAME", hide_env_values = true)]
    pub cassandra_username: Option<String>,

    #[arg(long, env = "CDC_CASSANDRA_PASSWORD", hide_env_values = true)]
    pub cassandra_password: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct DdlArgs {
    /// Target keyspace
    #[arg(long, default_value = "binance_test")]
    pub keyspace: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct CdcConfig {
    /// Connector namespace; topics are `<ns>.<ns>.<table>`.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub kafka: KafkaSourceConfig,
    pub cassandra: CassandraConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default = "default_pipelines")]
    pub pipelines: Vec<PipelineConfig>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl CdcConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Credentials from the command line or environment win over the file.
    pub fn apply_overrides(&mut self, args: &RunArgs) {
        if let Some(ref v) = args.kafka_username {
            self.kafka.sasl_username = Some(v.clone());
        }
        if let Some(ref v) = args.kafka_password {
            self.kafka.sasl_password = Some(v.clone());
        }
        if let Some(ref v) = args.cassandra_username {
            self.cassandra.username = Some(v.clone());
        }
        if let Some(ref v) = args.cassandra_password {
            self.cassandra.password = Some(v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [kafka]
        bootstrap_servers = "broker-1:9092"

        [cassandra]
        nodes = ["10.0.0.5:9042"]
    "#;

    #[test]
    fn minimal_config_replicates_all_entities() {
        let cfg = CdcConfig::parse(MINIMAL).unwrap();
        assert_eq!(cfg.namespace, "binance");
        assert_eq!(cfg.pipelines.len(), 5);
        assert_eq!(cfg.cassandra.keyspace, "binance_test");
        assert_eq!(cfg.engine.stagger_ms, 15_000);
        assert_eq!(cfg.kafka.offset_reset, "earliest");
    }

    #[test]
    fn example_config_parses() {
        let cfg = CdcConfig::parse(include_str!("../config.example.toml")).unwrap();
        let bindings = cdc_engine::config::resolve_bindings(&cfg.pipelines, &cfg.namespace).unwrap();
        assert_eq!(bindings.len(), 5);
    }

    #[test]
    fn overrides_fill_credentials() {
        let mut cfg = CdcConfig::parse(MINIMAL).unwrap();
        let args = RunArgs {
            config: "config.toml".into(),
            kafka_username: Some("api-key".into()),
            kafka_password: Some("api-secret".into()),
            cassandra_username: None,
            cassandra_password: Some("cass".into()),
        };
        cfg.apply_overrides(&args);
        assert_eq!(cfg.kafka.sasl_username.as_deref(), Some("api-key"));
        assert_eq!(cfg.kafka.sasl_password.as_deref(), Some("api-secret"));
        assert_eq!(cfg.cassandra.username, None);
        assert_eq!(cfg.cassandra.password.as_deref(), Some("cass"));
    }

    #[test]
    fn missing_sections_fail() {
        assert!(CdcConfig::parse("[kafka]\nbootstrap_servers = \"b:9092\"").is_err());
    }
}
