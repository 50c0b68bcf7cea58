//! Fan-out of benchmark probes across many models.
//!
//! Every model gets its own task that runs the model's warmups and then its
//! measured runs strictly in sequence. Model tasks run concurrently, bounded only
//! by the run's [`ThrottleController`]. Each finished probe is pushed onto a channel
//! drained by a single collector loop, which persists measured results and forwards
//! them to the [`BenchmarkHandle`] as progress events.
//!
//! Per-probe failures are captured in their [`ProbeResult`] and never abort the run.
//! Only precondition failures (no models, bad throttle caps, unknown prompt pack)
//! fail the run, and they do so before any request is sent.

use futures::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::models::{BenchmarkConfig, BenchmarkEvent, BenchmarkReport, BenchmarkRun, RunState};
use super::stats::{self, MetricStatistics};
use crate::errors::{Error, Result};
use crate::probes::{ProbeConfig, ProbeExecutor, ProbeRequest, ProbeResult};
use crate::prompt_packs::PromptPackCatalog;
use crate::provider::ProviderClient;
use crate::storage::Storage;
use crate::throttle::ThrottleController;
use crate::types::RunId;

pub struct BenchmarkOrchestrator<P, S> {
    executor: ProbeExecutor<P>,
    storage: Arc<S>,
    catalog: Arc<PromptPackCatalog>,
}

impl<P, S> BenchmarkOrchestrator<P, S>
where
    P: ProviderClient + 'static,
    S: Storage + 'static,
{
    pub fn new(client: Arc<P>, probe: ProbeConfig, storage: Arc<S>, catalog: Arc<PromptPackCatalog>) -> Self {
        Self {
            executor: ProbeExecutor::new(client, probe),
            storage,
            catalog,
        }
    }

    /// Start a benchmark run and return a handle to follow it.
    ///
    /// Preconditions are checked first. If one fails the run is persisted as
    /// `failed` and the error is returned; no probe is issued.
    #[tracing::instrument(skip_all, fields(models = config.models.len(), prompt_pack = %config.prompt_pack))]
    pub async fn run(&self, config: BenchmarkConfig) -> Result<BenchmarkHandle> {
        let mut run = BenchmarkRun::pending(&config);

        let prepared = self.prepare(&config);
        let (prompt, throttle) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(run_id = %run.id, error = %e, "Benchmark rejected");
                run.fail(e.to_string())?;
                self.storage.put_benchmark_run(&run).await?;
                return Err(e);
            }
        };

        run.transition(RunState::Running)?;
        self.storage.put_benchmark_run(&run).await?;
        tracing::info!(
            run_id = %run.id,
            runs = config.runs,
            warmup_runs = config.warmup_runs,
            total_probes = config.total_probes(),
            "Benchmark started"
        );

        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = RunDriver {
            executor: self.executor.clone(),
            storage: self.storage.clone(),
            throttle: Arc::new(throttle),
            prompt,
            cancel: cancel.clone(),
            events: events_tx,
        };

        let run_id = run.id;
        let span = tracing::info_span!("benchmark_run", run_id = %run_id);
        let task = tokio::spawn(driver.drive(run, config).instrument(span));

        Ok(BenchmarkHandle {
            run_id,
            events: events_rx,
            task,
            cancel,
        })
    }

    /// Run a benchmark to completion, ignoring progress events.
    pub async fn run_to_completion(&self, config: BenchmarkConfig) -> Result<BenchmarkReport> {
        self.run(config).await?.finish().await
    }

    fn prepare(&self, config: &BenchmarkConfig) -> Result<(Arc<str>, ThrottleController)> {
        config.validate()?;
        let prompt = Arc::from(self.catalog.get(&config.prompt_pack)?.prompt.as_str());
        let throttle = ThrottleController::new(config.throttle)?;
        Ok((prompt, throttle))
    }
}

/// State owned by one run's background task.
struct RunDriver<P, S> {
    executor: ProbeExecutor<P>,
    storage: Arc<S>,
    throttle: Arc<ThrottleController>,
    prompt: Arc<str>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<BenchmarkEvent>,
}

impl<P, S> RunDriver<P, S>
where
    P: ProviderClient + 'static,
    S: Storage + 'static,
{
    async fn drive(self, mut run: BenchmarkRun, config: BenchmarkConfig) -> Result<BenchmarkReport> {
        let total = config.measured_probes();
        let (warmup_runs, runs, max_tokens) = (config.warmup_runs, config.runs, config.max_tokens);
        // Receivers may have gone away; progress is best effort
        let _ = self.events.send(BenchmarkEvent::Started { run_id: run.id, total });

        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<ProbeResult>();
        let mut tasks = JoinSet::new();

        for model in config.models {
            let executor = self.executor.clone();
            let throttle = self.throttle.clone();
            let cancel = self.cancel.clone();
            let prompt = self.prompt.clone();
            let results_tx = results_tx.clone();
            let span = tracing::debug_span!("benchmark_model", model = %model.id, model_name = %model.model_name);

            tasks.spawn(
                async move {
                    for i in 0..(warmup_runs + runs) {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let request = ProbeRequest::for_model(&model, prompt.clone(), max_tokens, i < warmup_runs);
                        let result = executor.execute(&request, &throttle, &cancel).await;
                        if results_tx.send(result).is_err() {
                            break;
                        }
                    }
                }
                .instrument(span),
            );
        }
        drop(results_tx);

        let mut results = Vec::with_capacity(total);
        let mut warmups_discarded = 0;
        while let Some(result) = results_rx.recv().await {
            if result.is_warmup {
                warmups_discarded += 1;
                tracing::debug!(model = %result.model_id, "Warmup result discarded");
                continue;
            }

            if let Err(e) = self
                .storage
                .append_probe_results(run.id, std::slice::from_ref(&result))
                .await
            {
                tracing::warn!(model = %result.model_id, error = %e, "Failed to persist probe result");
            }
            results.push(result.clone());
            let _ = self.events.send(BenchmarkEvent::Result {
                result,
                completed: results.len(),
                total,
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Benchmark model task panicked");
            }
        }

        let state = if self.cancel.is_cancelled() {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        run.transition(state)?;
        if let Err(e) = self.storage.put_benchmark_run(&run).await {
            tracing::warn!(state = %state, error = %e, "Failed to persist finished benchmark run");
        }

        let statistics = stats::per_model(&results);
        let overall = MetricStatistics::from_results(&results);
        tracing::info!(
            state = %state,
            results = results.len(),
            errors = overall.error_count,
            warmups_discarded,
            "Benchmark finished"
        );
        let _ = self.events.send(BenchmarkEvent::Finished { run_id: run.id, state });

        Ok(BenchmarkReport {
            run,
            results,
            warmups_discarded,
            statistics,
            overall,
        })
    }
}

/// Handle to an in-progress benchmark run.
///
/// Measured results can be consumed incrementally with [`next_result`](Self::next_result)
/// or [`events`](Self::events); [`finish`](Self::finish) waits for the full report.
/// Events are delivered once; a consumed event is not replayed. Dropping the handle
/// detaches the run, which then completes in the background.
pub struct BenchmarkHandle {
    run_id: RunId,
    events: mpsc::UnboundedReceiver<BenchmarkEvent>,
    task: JoinHandle<Result<BenchmarkReport>>,
    cancel: CancellationToken,
}

impl BenchmarkHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Next progress event, or `None` once the run has finished and all events were read.
    pub async fn next_event(&mut self) -> Option<BenchmarkEvent> {
        self.events.recv().await
    }

    /// Next measured result, skipping other events.
    pub async fn next_result(&mut self) -> Option<ProbeResult> {
        loop {
            if let BenchmarkEvent::Result { result, .. } = self.events.recv().await? {
                return Some(result);
            }
        }
    }

    /// Progress events as a stream.
    pub fn events(&mut self) -> impl Stream<Item = BenchmarkEvent> + '_ {
        futures::stream::poll_fn(move |cx| self.events.poll_recv(cx))
    }

    /// Ask the run to stop. Probes in flight are abandoned and reported as cancelled,
    /// no new probes start, and the run ends in the `cancelled` state.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to end and return its report. Unread events are discarded.
    pub async fn finish(self) -> Result<BenchmarkReport> {
        drop(self.events);
        self.task
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("benchmark task failed: {e}")))?
    }
}
