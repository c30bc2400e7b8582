use std::sync::Arc;
use std::time::Duration;

use cdc_api::{CdcError, EntityRow, ErrorKind, RowSink};

use crate::error::EngineError;
use crate::metrics::PipelineMetrics;
use crate::retry::{RetryPolicy, retry};

/// Rows landed by one batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub written: u64,
    pub rejected: u64,
}

/// Writes a pipeline's rows into its destination table.
///
/// Rows are upserts, so retrying a partially written batch is safe: rows
/// already written are simply overwritten with the same values.
pub struct SinkWriter {
    sink: Arc<dyn RowSink>,
    table: String,
    retry: RetryPolicy,
    write_timeout: Duration,
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn RowSink>, table: impl Into<String>, retry: RetryPolicy, write_timeout: Duration) -> Self {
        Self { sink, table: table.into(), retry, write_timeout }
    }

    /// Write `rows`, retrying the whole batch while the destination is
    /// unavailable.
    ///
    /// Rows the destination rejects individually are logged and counted;
    /// they do not fail the batch. Fatal errors and exhausted retries do.
    pub async fn write_batch(&self, rows: &[EntityRow], metrics: &PipelineMetrics) -> Result<BatchOutcome, EngineError> {
        let target = format!("table '{}'", self.table);
        let mut attempt = 0u32;
        let outcome = retry(&self.retry, &target, || {
            attempt += 1;
            if attempt > 1 {
                metrics.add_write_retries(1);
            }
            self.write_once(rows)
        })
        .await
        .map_err(|e| e.into_engine(&target, |source| EngineError::Sink { table: self.table.clone(), source }))?;

        metrics.add_rows_written(outcome.written);
        metrics.add_rows_rejected(outcome.rejected);
        Ok(outcome)
    }

    async fn write_once(&self, rows: &[EntityRow]) -> Result<BatchOutcome, CdcError> {
        let mut outcome = BatchOutcome::default();
        for row in rows {
            let write = self.sink.write_row(&self.table, row);
            let result = match tokio::time::timeout(self.write_timeout, write).await {
                Ok(r) => r,
                Err(_) => Err(CdcError::unavailable(format!(
                    "write timed out after {}ms",
                    self.write_timeout.as_millis()
                ))),
            };
            match result {
                Ok(()) => outcome.written += 1,
                Err(e) if e.kind() == ErrorKind::Row => {
                    tracing::warn!(
                        table = %self.table,
                        key = ?row.key(),
                        error = %e,
                        "row rejected by destination, skipping"
                    );
                    outcome.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }
}
