use std::sync::Arc;

use cdc_api::{RowSink, SourceFactory};

/// Shared runtime resources: the destination session and the bus client
/// factory. Built once at startup, cloned into every pipeline task.
#[derive(Clone)]
pub struct RuntimeContext {
    sink: Arc<dyn RowSink>,
    sources: Arc<dyn SourceFactory>,
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext").finish_non_exhaustive()
    }
}

impl RuntimeContext {
    pub fn new(sink: Arc<dyn RowSink>, sources: Arc<dyn SourceFactory>) -> Self {
        Self { sink, sources }
    }

    pub fn sink(&self) -> &Arc<dyn RowSink> {
        &self.sink
    }

    pub fn sources(&self) -> &Arc<dyn SourceFactory> {
        &self.sources
    }

    /// Close the destination session. Call after every pipeline has exited.
    pub async fn teardown(&self) {
        match self.sink.close().await {
            Ok(()) => tracing::info!("destination session closed"),
            Err(e) => tracing::warn!(error = %e, "destination close failed"),
        }
    }
}
