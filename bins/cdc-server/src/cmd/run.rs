use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{SignalKind, signal};

use cdc_engine::config::resolve_bindings;
use cdc_engine::{PipelineSettings, RuntimeContext, Supervisor};
use cdc_source_kafka::KafkaSourceFactory;
use cdc_storage_cassandra::CassandraSink;

use crate::config::{CdcConfig, RunArgs};
use crate::error::ServerError;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(args: RunArgs) -> Result<(), ServerError> {
    tracing::info!("cdc-server starting");

    // --- Load config ---
    let mut config = CdcConfig::load(&args.config)?;
    config.apply_overrides(&args);
    tracing::info!(config = %args.config, "loaded config");

    let bindings = resolve_bindings(&config.pipelines, &config.namespace)?;
    let settings = PipelineSettings::from(&config.engine);

    // --- Runtime context ---
    let linger = Duration::from_millis(config.engine.linger_ms);
    let sources = KafkaSourceFactory::new(config.kafka.clone(), linger)?;
    let sink = CassandraSink::connect(&config.cassandra).await?;
    let ctx = RuntimeContext::new(Arc::new(sink), Arc::new(sources));

    // --- Pipelines ---
    let supervisor = Supervisor::start(&ctx, bindings, settings)?;
    let token = supervisor.shutdown_token();

    let mut sigterm = signal(SignalKind::terminate())?;
    let signal_token = token.clone();
    let signals = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received, shutting down..."),
            _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down..."),
            _ = signal_token.cancelled() => return,
        }
        signal_token.cancel();
    });

    let handles = supervisor.metrics();
    let stats_token = token.clone();
    let stats = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stats_token.cancelled() => break,
                _ = ticker.tick() => {
                    for (name, metrics) in &handles {
                        let s = metrics.snapshot();
                        tracing::info!(
                            pipeline = %name,
                            messages = s.messages,
                            rows_written = s.rows_written,
                            decode_failures = s.decode_failures,
                            filtered = s.filtered,
                            "pipeline stats"
                        );
                    }
                }
            }
        }
    });

    tracing::info!(pipelines = config.pipelines.len(), "server ready, press Ctrl+C to stop");

    let report = supervisor.join().await;
    token.cancel();
    let _ = signals.await;
    let _ = stats.await;

    ctx.teardown().await;

    for p in &report.pipelines {
        let metrics = serde_json::to_string(&p.metrics).unwrap_or_default();
        match &p.outcome {
            Ok(()) => tracing::info!(pipeline = %p.name, topic = %p.topic, %metrics, "pipeline finished"),
            Err(e) => tracing::error!(pipeline = %p.name, topic = %p.topic, %metrics, error = %e, "pipeline failed"),
        }
    }

    match report.first_failure() {
        None => {
            tracing::info!("cdc-server stopped");
            Ok(())
        }
        Some(first) => Err(ServerError::PipelinesFailed {
            failed: report.failures().count(),
            first: format!("{}: {}", first.name, first.outcome.as_ref().err().map(ToString::to_string).unwrap_or_default()),
        }),
    }
}
