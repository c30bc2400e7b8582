pub mod config;
pub mod context;
pub mod decoder;
pub mod error;
pub mod flatten;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod supervisor;
pub mod writer;

pub use context::RuntimeContext;
pub use config::{EngineConfig, PipelineConfig};
pub use error::EngineError;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{Pipeline, PipelineBinding, PipelineSettings};
pub use supervisor::{PipelineReport, Supervisor, SupervisorReport};
