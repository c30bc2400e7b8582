use serde::Deserialize;

use cdc_api::EntityKind;

use crate::error::EngineError;
use crate::pipeline::PipelineBinding;
use crate::retry::RetryPolicy;

/// `[engine]` section: batching, timing and retry knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on messages per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a poll waits for the first message of a batch.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// How long a poll waits for each further message once a batch has started.
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,

    /// Deadline for a single row write.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Delay between consecutive pipeline starts.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_batch_size() -> usize {
    500
}

fn default_poll_timeout_ms() -> u64 {
    1_000
}

fn default_linger_ms() -> u64 {
    50
}

fn default_write_timeout_ms() -> u64 {
    30_000
}

fn default_stagger_ms() -> u64 {
    15_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
            linger_ms: default_linger_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            stagger_ms: default_stagger_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

/// One `[[pipelines]]` entry. Topic and table default from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineConfig {
    /// Entity name (`trade`) or its default table name (`recent_trades`).
    pub entity: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
}

/// One entry per catalog entity, in startup order.
pub fn default_pipelines() -> Vec<PipelineConfig> {
    EntityKind::ALL
        .into_iter()
        .map(|e| PipelineConfig { entity: e.name().to_string(), topic: None, table: None })
        .collect()
}

/// Resolve pipeline entries against the catalog.
pub fn resolve_bindings(pipelines: &[PipelineConfig], namespace: &str) -> Result<Vec<PipelineBinding>, EngineError> {
    let mut bindings: Vec<PipelineBinding> = Vec::with_capacity(pipelines.len());
    for cfg in pipelines {
        let entity = EntityKind::from_name(&cfg.entity).map_err(|_| EngineError::UnknownEntity(cfg.entity.clone()))?;
        let mut binding = PipelineBinding::for_entity(entity, namespace);
        if let Some(topic) = &cfg.topic {
            binding.topic = topic.clone();
        }
        if let Some(table) = &cfg.table {
            binding.table = table.clone();
        }
        if binding.topic.is_empty() || binding.table.is_empty() {
            return Err(EngineError::Config(format!("pipeline '{}': empty topic or table", cfg.entity)));
        }
        if bindings.iter().any(|b| b.table == binding.table) {
            return Err(EngineError::Config(format!(
                "table '{}' is bound to more than one pipeline",
                binding.table
            )));
        }
        bindings.push(binding);
    }
    Ok(bindings)
}
