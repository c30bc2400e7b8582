#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Plugin(#[from] cdc_api::CdcError),

    #[error("{0}")]
    Engine(#[from] cdc_engine::EngineError),

    #[error("{failed} pipeline(s) failed, first: {first}")]
    PipelinesFailed { failed: usize, first: String },

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
