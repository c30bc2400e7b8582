use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use cdc_api::{ChangeSource, EntityKind};

use crate::context::RuntimeContext;
use crate::error::EngineError;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::pipeline::{Pipeline, PipelineBinding, PipelineSettings};
use crate::retry::retry;

/// How one pipeline ended.
#[derive(Debug)]
pub struct PipelineReport {
    /// Pipeline name: its destination table.
    pub name: String,
    pub entity: EntityKind,
    pub topic: String,
    pub metrics: MetricsSnapshot,
    pub outcome: Result<(), EngineError>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Outcome of every pipeline, in startup order.
#[derive(Debug, Default)]
pub struct SupervisorReport {
    pub pipelines: Vec<PipelineReport>,
    first_failure: Option<usize>,
}

impl SupervisorReport {
    pub fn failures(&self) -> impl Iterator<Item = &PipelineReport> {
        self.pipelines.iter().filter(|p| !p.is_success())
    }

    /// The pipeline that failed earliest in time.
    pub fn first_failure(&self) -> Option<&PipelineReport> {
        self.first_failure.and_then(|i| self.pipelines.get(i))
    }

    pub fn is_success(&self) -> bool {
        self.pipelines.iter().all(PipelineReport::is_success)
    }

    pub fn get(&self, name: &str) -> Option<&PipelineReport> {
        self.pipelines.iter().find(|p| p.name == name)
    }
}

struct PipelineSlot {
    name: String,
    metrics: Arc<PipelineMetrics>,
}

/// Starts one task per binding and tracks them to completion.
///
/// Pipelines are independent failure domains: a fatal error in one is
/// logged and reported but leaves the others running. Shutdown is
/// cooperative through a shared cancellation token.
pub struct Supervisor {
    tasks: JoinSet<(usize, PipelineReport)>,
    slots: Vec<PipelineSlot>,
    token: CancellationToken,
    finished: Vec<Option<PipelineReport>>,
    first_failure: Option<usize>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("pipelines", &self.slots.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("running", &self.tasks.len())
            .finish()
    }
}

impl Supervisor {
    /// Spawn a pipeline per binding. Pipeline `i` starts after
    /// `i * settings.stagger`.
    pub fn start(
        ctx: &RuntimeContext,
        bindings: Vec<PipelineBinding>,
        settings: PipelineSettings,
    ) -> Result<Self, EngineError> {
        if bindings.is_empty() {
            return Err(EngineError::Config("no pipelines configured".into()));
        }
        let mut tables = HashSet::new();
        for b in &bindings {
            if !tables.insert(b.table.as_str()) {
                return Err(EngineError::Config(format!("table '{}' is bound to more than one pipeline", b.table)));
            }
        }

        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut slots = Vec::with_capacity(bindings.len());

        for (index, binding) in bindings.into_iter().enumerate() {
            let metrics = Arc::new(PipelineMetrics::new());
            let delay = settings.stagger.saturating_mul(index as u32);
            let name = binding.table.clone();
            slots.push(PipelineSlot { name: name.clone(), metrics: metrics.clone() });

            let entity = binding.entity;
            let topic = binding.topic.clone();
            let inner = tokio::spawn(run_pipeline(
                ctx.clone(),
                binding,
                settings,
                delay,
                token.child_token(),
                metrics.clone(),
            ));

            tasks.spawn(async move {
                let outcome = match inner.await {
                    Ok(r) => r,
                    Err(e) => Err(EngineError::Join { name: name.clone(), detail: e.to_string() }),
                };
                let report = PipelineReport { name, entity, topic, metrics: metrics.snapshot(), outcome };
                (index, report)
            });

            tracing::info!(
                pipeline = %slots[index].name,
                entity = %entity,
                delay_ms = delay.as_millis() as u64,
                "scheduled pipeline"
            );
        }

        let finished = slots.iter().map(|_| None).collect();
        Ok(Self { tasks, slots, token, finished, first_failure: None })
    }

    /// Token that stops every pipeline when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Ask every pipeline to stop after its current batch.
    pub fn shutdown(&self) {
        tracing::info!("stopping pipelines");
        self.token.cancel();
    }

    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Live counters of every pipeline, in startup order.
    pub fn metrics(&self) -> Vec<(String, Arc<PipelineMetrics>)> {
        self.slots.iter().map(|s| (s.name.clone(), s.metrics.clone())).collect()
    }

    /// Wait for the next pipeline to exit. `None` once all have exited.
    pub async fn next_exit(&mut self) -> Option<&PipelineReport> {
        loop {
            match self.tasks.join_next().await? {
                Ok((index, report)) => {
                    match &report.outcome {
                        Ok(()) => tracing::info!(pipeline = %report.name, "pipeline exited"),
                        Err(e) => {
                            tracing::error!(pipeline = %report.name, error = %e, "pipeline terminated");
                            self.first_failure.get_or_insert(index);
                        }
                    }
                    self.finished[index] = Some(report);
                    return self.finished[index].as_ref();
                }
                Err(e) => tracing::error!(error = %e, "pipeline monitor task aborted"),
            }
        }
    }

    /// Wait for every pipeline to exit.
    pub async fn join(mut self) -> SupervisorReport {
        while self.next_exit().await.is_some() {}
        let pipelines = self.finished.into_iter().flatten().collect::<Vec<_>>();
        let first_failure = self
            .first_failure
            .and_then(|i| self.slots.get(i))
            .and_then(|slot| pipelines.iter().position(|p| p.name == slot.name));
        SupervisorReport { pipelines, first_failure }
    }
}

async fn run_pipeline(
    ctx: RuntimeContext,
    binding: PipelineBinding,
    settings: PipelineSettings,
    delay: Duration,
    token: CancellationToken,
    metrics: Arc<PipelineMetrics>,
) -> Result<(), EngineError> {
    if !delay.is_zero() {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let source = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        r = open_pipeline(&ctx, &binding, &settings) => r?,
    };

    Pipeline::new(binding, source, ctx.sink().clone(), settings, metrics)
        .run(token)
        .await
}

/// Prepare the destination table, then subscribe to the topic.
async fn open_pipeline(
    ctx: &RuntimeContext,
    binding: &PipelineBinding,
    settings: &PipelineSettings,
) -> Result<Box<dyn ChangeSource>, EngineError> {
    let schema = binding.schema();
    let table_target = format!("table '{}'", binding.table);
    retry(&settings.retry, &table_target, || ctx.sink().prepare(&binding.table, schema))
        .await
        .map_err(|e| {
            e.into_engine(&table_target, |source| EngineError::Sink { table: binding.table.clone(), source })
        })?;
    tracing::info!(table = %binding.table, "destination table ready");

    let topic_target = format!("topic '{}'", binding.topic);
    let source = retry(&settings.retry, &topic_target, || ctx.sources().open(&binding.topic, &binding.table))
        .await
        .map_err(|e| {
            e.into_engine(&topic_target, |source| EngineError::Source { topic: binding.topic.clone(), source })
        })?;
    tracing::info!(topic = %binding.topic, "subscribed");
    Ok(source)
}
