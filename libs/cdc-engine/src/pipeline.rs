use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cdc_api::{ChangeSource, EntityKind, EntitySchema, ErrorKind, OffsetTracker, RowSink};

use crate::config::EngineConfig;
use crate::decoder::{Decoded, EnvelopeDecoder};
use crate::error::EngineError;
use crate::flatten::flatten;
use crate::metrics::PipelineMetrics;
use crate::retry::RetryPolicy;
use crate::writer::SinkWriter;

/// Which topic feeds which table, and with what entity shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineBinding {
    pub entity: EntityKind,
    pub topic: String,
    pub table: String,
}

impl PipelineBinding {
    /// Binding with the entity's default topic and table.
    pub fn for_entity(entity: EntityKind, namespace: &str) -> Self {
        let schema = entity.schema();
        Self {
            entity,
            topic: schema.default_topic(namespace),
            table: schema.table.to_string(),
        }
    }

    pub fn schema(&self) -> &'static EntitySchema {
        self.entity.schema()
    }
}

/// Runtime knobs shared by all pipelines.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub poll_timeout: Duration,
    pub write_timeout: Duration,
    /// Delay between consecutive pipeline starts.
    pub stagger: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for PipelineSettings {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            poll_timeout: Duration::from_millis(cfg.poll_timeout_ms),
            write_timeout: Duration::from_millis(cfg.write_timeout_ms),
            stagger: Duration::from_millis(cfg.stagger_ms),
            retry: cfg.retry,
        }
    }
}

/// One topic-to-table replication loop.
///
/// Each iteration polls a batch, decodes and filters it, writes the
/// surviving rows, and only then commits the batch's positions. A crash
/// between write and commit replays the batch, which upserts rewrite.
pub struct Pipeline {
    binding: PipelineBinding,
    source: Box<dyn ChangeSource>,
    writer: SinkWriter,
    decoder: EnvelopeDecoder,
    settings: PipelineSettings,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(
        binding: PipelineBinding,
        source: Box<dyn ChangeSource>,
        sink: Arc<dyn RowSink>,
        settings: PipelineSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let writer = SinkWriter::new(sink, binding.table.clone(), settings.retry, settings.write_timeout);
        let decoder = EnvelopeDecoder::new(binding.schema());
        Self { binding, source, writer, decoder, settings, metrics }
    }

    /// Run until cancelled or a fatal error.
    ///
    /// Cancellation is observed between batches: a batch in flight is
    /// written and committed before the loop exits.
    pub async fn run(mut self, token: CancellationToken) -> Result<(), EngineError> {
        tracing::info!(
            entity = %self.binding.entity,
            topic = %self.binding.topic,
            table = %self.binding.table,
            "pipeline started"
        );
        let result = self.run_loop(&token).await;
        self.source.close().await;
        let m = self.metrics.snapshot();
        match &result {
            Ok(()) => tracing::info!(
                table = %self.binding.table,
                messages = m.messages,
                rows_written = m.rows_written,
                "pipeline stopped"
            ),
            Err(e) => tracing::error!(
                table = %self.binding.table,
                messages = m.messages,
                rows_written = m.rows_written,
                error = %e,
                "pipeline failed"
            ),
        }
        result
    }

    async fn run_loop(&mut self, token: &CancellationToken) -> Result<(), EngineError> {
        let mut poll_attempt = 1;
        loop {
            let polled = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                r = self.source.poll_batch(self.settings.batch_size, self.settings.poll_timeout) => r,
            };

            let messages = match polled {
                Ok(m) => {
                    poll_attempt = 1;
                    m
                }
                Err(e) if self.settings.retry.should_retry(poll_attempt, &e) => {
                    let delay = self.settings.retry.backoff(poll_attempt);
                    tracing::warn!(
                        topic = %self.binding.topic,
                        attempt = poll_attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "poll failed, retrying"
                    );
                    poll_attempt += 1;
                    tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
                Err(e) if e.is_retryable() => {
                    return Err(EngineError::RetriesExhausted {
                        target: format!("topic '{}'", self.binding.topic),
                        attempts: poll_attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    return Err(EngineError::Source { topic: self.binding.topic.clone(), source: e });
                }
            };

            if messages.is_empty() {
                continue;
            }

            let mut tracker = OffsetTracker::new();
            let mut rows = Vec::with_capacity(messages.len());
            let mut filtered = 0u64;
            let mut failed = 0u64;

            for msg in &messages {
                tracker.update(msg.partition, msg.offset);
                match self.decoder.decode(msg.payload.as_deref()) {
                    Ok(Decoded::Event(event)) => {
                        let op = event.op;
                        match flatten(event) {
                            Some(row) => rows.push(row),
                            None => {
                                tracing::debug!(topic = %msg.topic, offset = msg.offset, %op, "event filtered");
                                filtered += 1;
                            }
                        }
                    }
                    Ok(Decoded::Tombstone) => {
                        tracing::debug!(topic = %msg.topic, offset = msg.offset, "tombstone skipped");
                        filtered += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            error = %e,
                            "skipping undecodable message"
                        );
                        failed += 1;
                    }
                }
            }

            self.metrics.add_messages(messages.len() as u64);
            self.metrics.add_filtered(filtered);
            self.metrics.add_decode_failures(failed);

            let outcome = self.writer.write_batch(&rows, &self.metrics).await?;
            self.metrics.add_batches(1);

            match self.source.commit(tracker.positions()).await {
                Ok(()) => self.metrics.add_commits(1),
                Err(e) if e.kind() == ErrorKind::Auth => {
                    return Err(EngineError::Source { topic: self.binding.topic.clone(), source: e });
                }
                Err(e) => {
                    // Positions advance with the next successful commit;
                    // until then a restart replays the batch.
                    tracing::warn!(topic = %self.binding.topic, error = %e, "offset commit failed");
                    self.metrics.add_commit_failures(1);
                }
            }

            tracing::info!(
                table = %self.binding.table,
                messages = messages.len(),
                written = outcome.written,
                rejected = outcome.rejected,
                filtered,
                decode_failures = failed,
                partitions = tracker.partition_count(),
                "batch processed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binding_follows_topic_convention() {
        let b = PipelineBinding::for_entity(EntityKind::DailyTicker, "binance");
        assert_eq!(b.topic, "binance.binance.daily_ticker");
        assert_eq!(b.table, "daily_ticker");
        assert_eq!(b.schema().entity, EntityKind::DailyTicker);
    }

    #[test]
    fn settings_from_engine_config() {
        let cfg = EngineConfig { batch_size: 0, stagger_ms: 250, ..EngineConfig::default() };
        let s = PipelineSettings::from(&cfg);
        assert_eq!(s.batch_size, 1);
        assert_eq!(s.stagger, Duration::from_millis(250));
        assert_eq!(s.poll_timeout, Duration::from_millis(1_000));
    }
}
