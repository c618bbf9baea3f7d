//! Per-chunk retry with configurable backoff

use super::{ChunkCompletion, ChunkError, ChunkFailure, ExecutionContext};
use crate::config::{BackoffConfig, BackoffStrategy};
use crate::error::FailureKind;
use crate::plan::Chunk;
use crate::runner::AttemptRecord;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How many times, and how patiently, transient failures are retried
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffConfig,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffConfig) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether a failure of `kind` on attempt number `attempt` (1-based) earns another try
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> bool {
        kind.is_transient() && attempt <= self.max_retries
    }

    /// Delay before the retry that follows attempt number `attempt`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let backoff = &self.backoff;
        let step = attempt.saturating_sub(1);
        let base_delay = match &backoff.strategy {
            BackoffStrategy::Fixed => backoff.initial_delay,
            BackoffStrategy::Linear { increment } => {
                backoff.initial_delay.saturating_add(increment.saturating_mul(step))
            }
            BackoffStrategy::Exponential { base } => {
                let multiplier = base.powi(step.min(i32::MAX as u32) as i32);
                Duration::try_from_secs_f64(backoff.initial_delay.as_secs_f64() * multiplier)
                    .unwrap_or(backoff.max_delay)
            }
        };

        base_delay.min(backoff.max_delay)
    }

    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.backoff.jitter || delay.is_zero() {
            return delay;
        }

        let mut rng = rand::rng();
        let jitter_range = delay.as_secs_f64() * self.backoff.jitter_factor;
        let jitter = rng.random_range(-jitter_range / 2.0..=jitter_range / 2.0);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.apply_jitter(self.calculate_delay(attempt))
    }
}

/// Drive one chunk to a final outcome
///
/// Each attempt is bounded by the context's timeout and recorded in the job
/// report. Transient failures are retried with backoff until the policy runs
/// out, at which point they become permanent. No retry starts once the
/// context is cancelled.
pub async fn execute_with_retry<A, F, Fut>(
    chunk: Chunk,
    ctx: &ExecutionContext,
    mut attempt_fn: F,
) -> ChunkCompletion<A>
where
    F: FnMut(Chunk) -> Fut,
    Fut: Future<Output = Result<A, ChunkError>>,
{
    let started = Instant::now();
    let index = chunk.index;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!("Starting chunk {} attempt {}", index, attempt);

        let attempt_started = Instant::now();
        let fut = attempt_fn(chunk.clone());
        let result = match ctx.chunk_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or_else(|_| Err(ChunkError::timeout(limit))),
            None => fut.await,
        };
        let duration = attempt_started.elapsed();

        let err = match result {
            Ok(value) => {
                ctx.report
                    .record_attempt(index, AttemptRecord::success(attempt, duration));
                return ChunkCompletion {
                    chunk,
                    outcome: Ok(value),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                };
            }
            Err(err) => err,
        };

        ctx.report.record_attempt(
            index,
            AttemptRecord::failure(attempt, err.kind, err.message.clone(), duration),
        );

        let failure = if ctx.retry.should_retry(err.kind, attempt) {
            let delay = ctx.retry.delay_for(attempt);
            warn!(
                "Chunk {} attempt {} failed ({}), retrying in {:?}: {}",
                index, attempt, err.kind, delay, err.message
            );
            if !ctx.cancel.is_cancelled() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancel.cancelled() => {}
                }
            }
            if !ctx.cancel.is_cancelled() {
                continue;
            }
            debug!("Chunk {} not retried: job cancelled", index);
            ChunkFailure::new(err.kind, err.message, attempt)
        } else if err.kind.is_transient() && !ctx.cancel.is_cancelled() {
            ChunkFailure::exhausted(err.message, attempt)
        } else {
            ChunkFailure::new(err.kind, err.message, attempt)
        };

        return ChunkCompletion {
            chunk,
            outcome: Err(failure),
            attempts: attempt,
            elapsed: started.elapsed(),
        };
    }
}
