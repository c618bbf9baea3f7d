//! Job orchestration
//!
//! The [`Runner`] walks a job through `Planning -> Dispatching -> Reducing`.
//! It plans chunks, hands them to the configured executor, folds the
//! completions into one accumulator in chunk-index order, enforces the
//! failure budget, honours cancellation and finally runs the processor's
//! `postprocess` hook exactly once.

mod cancel;
mod metrics;
mod progress;
mod report;
pub mod state;

pub use cancel::CancellationSignal;
pub use metrics::JobMetrics;
pub use progress::{BarProgress, LogProgress, NoopProgress, ProgressObserver};
pub use report::{AttemptRecord, ChunkRecord, ChunkStatus, JobReport, ReportHandle};
pub use state::{apply_transition, JobState, JobTransition, StateError};

use crate::accumulator::{Accumulator, OrderedReducer};
use crate::config::{ConfigError, RunnerConfig};
use crate::error::{AbortReason, JobError};
use crate::executor::{ChunkCompletion, ExecutionContext, ExecutorBackend, RetryPolicy};
use crate::plan::{plan_chunks, ChunkPlan, Fileset, LengthCache, PlanError, PlanOptions};
use crate::processor::{ChunkTask, Processor, SourceTask};
use crate::source::DataSource;
use futures::StreamExt;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Result of a successful job
#[derive(Debug)]
pub struct JobOutput<A> {
    pub job_id: Uuid,
    /// Final accumulator, after `postprocess`
    pub accumulator: A,
    pub report: JobReport,
    pub metrics: JobMetrics,
}

/// An aborted job: the error, the finalized report and, in best-effort
/// mode, whatever had been reduced before the abort
#[derive(Debug)]
pub struct JobFailure<A> {
    pub error: JobError,
    pub report: JobReport,
    pub partial: Option<A>,
}

impl<A> JobFailure<A> {
    pub fn metrics(&self) -> JobMetrics {
        JobMetrics::from_report(&self.report)
    }
}

impl<A> fmt::Display for JobFailure<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} failed: {}", self.report.job_id, self.error)
    }
}

impl<A: fmt::Debug> std::error::Error for JobFailure<A> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub struct Runner {
    config: RunnerConfig,
    executor: ExecutorBackend,
    progress: Arc<dyn ProgressObserver>,
    cancel: CancellationSignal,
    lengths: LengthCache,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let executor = ExecutorBackend::from_config(&config.executor);
        Ok(Self {
            config,
            executor,
            progress: Arc::new(NoopProgress),
            cancel: CancellationSignal::new(),
            lengths: LengthCache::new(),
        })
    }

    /// Replace the executor built from the configuration
    pub fn with_executor(mut self, executor: ExecutorBackend) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that cancels jobs run by this runner
    pub fn cancellation(&self) -> CancellationSignal {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn executor(&self) -> &ExecutorBackend {
        &self.executor
    }

    /// Source lengths probed so far, shared by every job of this runner
    pub fn length_cache(&self) -> &LengthCache {
        &self.lengths
    }

    fn plan_options(&self) -> PlanOptions {
        let options = PlanOptions::new(self.config.chunk_size).fail_fast(self.config.fail_fast);
        match self.config.max_chunks {
            Some(max) => options.with_max_chunks(max),
            None => options,
        }
    }

    /// Plan the chunks of `fileset` without running anything
    pub fn plan<S: DataSource>(&self, fileset: &Fileset, source: &S) -> Result<ChunkPlan, PlanError> {
        plan_chunks(fileset, &self.plan_options(), |descriptor| {
            self.lengths
                .get_or_probe(descriptor, |d| source.probe_length(d))
        })
    }

    /// Run `processor` over every chunk of `fileset`
    pub async fn run<S, P>(
        &self,
        fileset: &Fileset,
        source: Arc<S>,
        processor: Arc<P>,
    ) -> Result<JobOutput<P::Output>, JobFailure<P::Output>>
    where
        S: DataSource,
        P: Processor<S::Events>,
    {
        let job_id = Uuid::new_v4();
        let span = info_span!("job", %job_id, executor = self.executor.name());
        self.run_job(job_id, fileset, source, processor)
            .instrument(span)
            .await
    }

    async fn run_job<S, P>(
        &self,
        job_id: Uuid,
        fileset: &Fileset,
        source: Arc<S>,
        processor: Arc<P>,
    ) -> Result<JobOutput<P::Output>, JobFailure<P::Output>>
    where
        S: DataSource,
        P: Processor<S::Events>,
    {
        let report = ReportHandle::new(JobReport::new(job_id, self.executor.name()));
        let mut job = Lifecycle {
            state: JobState::Idle,
            report: &report,
            progress: self.progress.as_ref(),
            output: PhantomData,
        };

        job.advance(JobTransition::Submit)?;
        info!(
            "Planning {} dataset(s) with {} source(s), chunk size {}",
            fileset.len(),
            fileset.source_count(),
            self.config.chunk_size
        );

        let plan = match self.plan(fileset, source.as_ref()) {
            Ok(plan) => plan,
            Err(e) => return Err(job.abort(e.into(), None)),
        };

        report.record_unavailable(&plan.unavailable);
        for unavailable in &plan.unavailable {
            warn!(
                "Source {} in dataset {} unavailable: {}",
                unavailable.location, unavailable.dataset, unavailable.reason
            );
        }
        if plan.is_empty() && !plan.unavailable.is_empty() {
            let reason = format!(
                "no chunks planned; {} source(s) unavailable",
                plan.unavailable.len()
            );
            return Err(job.abort(JobError::PlanningError { reason }, None));
        }
        if let Some(last) = plan.unavailable.last() {
            if plan.unavailable.len() > self.config.max_failures {
                let reason = AbortReason::FailureBudgetExceeded {
                    failures: plan.unavailable.len(),
                    budget: self.config.max_failures,
                    last_error: format!("source {} unavailable: {}", last.location, last.reason),
                };
                return Err(job.abort(JobError::JobAborted { reason }, None));
            }
        }

        job.advance(JobTransition::Planned)?;
        let chunks = plan.chunks;
        let total = chunks.len();
        info!(
            "Planned {} chunk(s) covering {} item(s)",
            total,
            chunks.iter().map(|c| c.len()).sum::<u64>()
        );
        report.register_chunks(&chunks);
        self.progress.on_start(total);

        // Internal signal; the user's signal only triggers it
        let dispatch = CancellationSignal::new();
        let ctx = ExecutionContext {
            retry: RetryPolicy::new(self.config.retries, self.config.backoff.clone()),
            chunk_timeout: self.config.chunk_timeout,
            report: report.clone(),
            cancel: dispatch.clone(),
        };
        let task: Arc<dyn ChunkTask<P::Output>> =
            Arc::new(SourceTask::new(source, processor.clone()));

        let mut stream = match self.executor.run(chunks, task, ctx) {
            Ok(stream) => stream,
            Err(e) => return Err(job.abort(e.into(), None)),
        };

        let mut reduction = Reduction {
            reducer: OrderedReducer::new(self.config.order),
            report: &report,
            progress: self.progress.as_ref(),
            total,
            completed: 0,
            failures: plan.unavailable.len(),
            budget: self.config.max_failures,
        };

        let mut aborted: Option<JobError> = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    aborted = Some(JobError::JobAborted { reason: AbortReason::Cancelled });
                    break;
                }
                next = stream.next() => next,
            };
            let Some(completion) = next else { break };
            if let Err(e) = reduction.absorb(completion) {
                aborted = Some(e);
                break;
            }
        }

        dispatch.cancel();
        if matches!(&aborted, Some(e) if e.is_cancellation()) {
            let grace = self.config.cancel_grace;
            info!("Cancellation requested, waiting up to {:?} for in-flight chunks", grace);
            let deadline = Instant::now() + grace;
            loop {
                match tokio::time::timeout_at(deadline, stream.next()).await {
                    Ok(Some(completion)) => {
                        // Already aborting; the budget no longer matters
                        let _ = reduction.absorb(completion);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!("Grace period elapsed, abandoning in-flight chunks");
                        break;
                    }
                }
            }
        }
        drop(stream);

        if let Some(error) = aborted {
            let partial = if self.config.best_effort {
                info!(
                    "Best-effort mode: returning partial result of {} chunk(s)",
                    reduction.reducer.merged()
                );
                Some(reduction.reducer.finish())
            } else {
                None
            };
            return Err(job.abort(error, partial));
        }

        job.advance(JobTransition::Dispatched)?;
        debug!(
            "Reducing: {} merged, {} skipped",
            reduction.reducer.merged(),
            reduction.reducer.skipped()
        );
        let accumulator = processor.postprocess(reduction.reducer.finish());
        job.advance(JobTransition::Reduced)?;

        let report = report.finalize(JobState::Done, None);
        let metrics = JobMetrics::from_report(&report);
        self.progress.on_finish(JobState::Done);
        info!(
            "Job done: {}/{} chunk(s) succeeded, {} item(s) in {}ms",
            metrics.chunks_succeeded, metrics.chunks_total, metrics.items_processed, metrics.wall_time_ms
        );

        Ok(JobOutput {
            job_id,
            accumulator,
            report,
            metrics,
        })
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish()
    }
}

/// State machine bookkeeping for one job producing an `A`
struct Lifecycle<'a, A> {
    state: JobState,
    report: &'a ReportHandle,
    progress: &'a dyn ProgressObserver,
    output: PhantomData<fn() -> A>,
}

impl<A> Lifecycle<'_, A> {
    fn advance(&mut self, transition: JobTransition) -> Result<(), JobFailure<A>> {
        match apply_transition(self.state, transition) {
            Ok(next) => {
                debug!("Job state {} -> {}", self.state, next);
                self.state = next;
                self.report.set_state(next);
                Ok(())
            }
            Err(e) => Err(self.abort(e.into(), None)),
        }
    }

    fn abort(&mut self, error: JobError, partial: Option<A>) -> JobFailure<A> {
        if let Ok(next) = apply_transition(self.state, JobTransition::Abort) {
            self.state = next;
        }
        let cancelled = self.report.mark_pending_cancelled();
        error!("Job aborted: {}", error);
        if cancelled > 0 {
            info!("{} chunk(s) never completed", cancelled);
        }

        let report = self
            .report
            .finalize(JobState::Aborted, error.abort_reason().cloned());
        self.progress.on_finish(JobState::Aborted);
        JobFailure {
            error,
            report,
            partial,
        }
    }
}

/// Running reduction plus failure accounting
struct Reduction<'a, A> {
    reducer: OrderedReducer<A>,
    report: &'a ReportHandle,
    progress: &'a dyn ProgressObserver,
    total: usize,
    completed: usize,
    failures: usize,
    budget: usize,
}

impl<A: Accumulator> Reduction<'_, A> {
    /// Record and fold one completion; errors once the failure budget is exceeded
    fn absorb(&mut self, completion: ChunkCompletion<A>) -> Result<(), JobError> {
        let ChunkCompletion {
            chunk,
            outcome,
            attempts,
            elapsed,
        } = completion;
        let id = chunk.id();
        self.completed += 1;

        let result = match outcome {
            Ok(value) => {
                self.report.record_completion(chunk.index, None, elapsed);
                debug!("Chunk {} done after {} attempt(s) in {:?}", id, attempts, elapsed);
                self.reducer.push(chunk.index, value);
                self.progress
                    .on_chunk_complete(self.completed, self.total, &id, true);
                return Ok(());
            }
            Err(failure) => {
                self.report
                    .record_completion(chunk.index, Some(&failure), elapsed);
                self.reducer.skip(chunk.index);
                self.failures += 1;

                if self.failures > self.budget {
                    error!("Chunk {} failed: {}", id, failure);
                    Err(JobError::JobAborted {
                        reason: AbortReason::FailureBudgetExceeded {
                            failures: self.failures,
                            budget: self.budget,
                            last_error: format!("chunk {}: {}", id, failure),
                        },
                    })
                } else {
                    warn!(
                        "Chunk {} failed, skipping ({} of {} tolerated failures): {}",
                        id, self.failures, self.budget, failure
                    );
                    Ok(())
                }
            }
        };

        self.progress
            .on_chunk_complete(self.completed, self.total, &id, false);
        result
    }
}
