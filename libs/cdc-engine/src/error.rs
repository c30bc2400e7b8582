use cdc_api::CdcError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("source ({topic}): {source}")]
    Source { topic: String, source: CdcError },

    #[error("sink ({table}): {source}")]
    Sink { table: String, source: CdcError },

    #[error("{target}: giving up after {attempts} attempts: {source}")]
    RetriesExhausted { target: String, attempts: u32, source: CdcError },

    #[error("pipeline '{name}' task aborted: {detail}")]
    Join { name: String, detail: String },
}
