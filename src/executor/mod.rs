//! Executor backends
//!
//! An executor takes the planned chunks and a [`ChunkTask`] and returns a
//! lazy [`ChunkStream`] of per-chunk completions. The set of backends is
//! closed: sequential, a local worker pool, and a distributed backend that
//! ships chunks to remote workers through a [`RemoteScheduler`].
//!
//! Every backend shares the same per-chunk policy (timeouts, retries with
//! backoff, report bookkeeping) through [`execute_with_retry`].

mod distributed;
mod pool;
mod retry;
mod sequential;

pub use distributed::{
    decode_payload, encode_payload, Compression, DistributedExecutor, InProcessScheduler,
    RemoteOutcome, RemoteScheduler, RemoteWorker, ResultEnvelope, TaskEnvelope, TransportError,
    INPROC_SCHEME,
};
pub use pool::PoolExecutor;
pub use retry::{execute_with_retry, RetryPolicy};
pub use sequential::SequentialExecutor;

use crate::accumulator::Accumulator;
use crate::config::{ConfigError, ExecutorConfig};
use crate::error::FailureKind;
use crate::plan::Chunk;
use crate::processor::{ChunkTask, ProcessError};
use crate::runner::{CancellationSignal, ReportHandle};
use crate::source::SourceError;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Failure of a single attempt at a chunk
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ChunkError {
    pub kind: FailureKind,
    pub message: String,
}

impl ChunkError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    /// Timeouts are always retryable
    pub fn timeout(limit: Duration) -> Self {
        Self::transient(format!("timed out after {:?}", limit))
    }
}

impl From<SourceError> for ChunkError {
    fn from(err: SourceError) -> Self {
        Self {
            kind: err.kind,
            message: err.message,
        }
    }
}

impl From<ProcessError> for ChunkError {
    fn from(err: ProcessError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Final failure of a chunk after all attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
    /// A transient failure that ran out of retries
    #[serde(default)]
    pub escalated: bool,
}

impl ChunkFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
            escalated: false,
        }
    }

    /// Transient failure whose retries are used up; now permanent
    pub fn exhausted(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
            attempts,
            escalated: true,
        }
    }
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.escalated {
            write!(f, "{} (retries exhausted after {} attempts)", self.message, self.attempts)
        } else {
            write!(f, "{} ({}, {} attempt(s))", self.message, self.kind, self.attempts)
        }
    }
}

/// What an executor yields for each chunk
#[derive(Debug)]
pub struct ChunkCompletion<A> {
    pub chunk: Chunk,
    pub outcome: Result<A, ChunkFailure>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<A> ChunkCompletion<A> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Lazy, finite, non-restartable sequence of completions
pub type ChunkStream<A> = BoxStream<'static, ChunkCompletion<A>>;

/// Per-run policy and shared state handed to an executor
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub retry: RetryPolicy,
    pub chunk_timeout: Option<Duration>,
    pub report: ReportHandle,
    /// Checked before each chunk is started
    pub cancel: CancellationSignal,
}

/// The closed set of execution strategies
#[derive(Clone)]
pub enum ExecutorBackend {
    Sequential(SequentialExecutor),
    Pool(PoolExecutor),
    Distributed(DistributedExecutor),
}

impl ExecutorBackend {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        match config {
            ExecutorConfig::Sequential => ExecutorBackend::Sequential(SequentialExecutor),
            ExecutorConfig::Pool { workers } => ExecutorBackend::Pool(PoolExecutor::new(*workers)),
            ExecutorConfig::Distributed {
                scheduler_address,
                workers,
                compression,
            } => {
                let compression = compression
                    .map(|level| Compression::Deflate { level })
                    .unwrap_or(Compression::None);
                ExecutorBackend::Distributed(
                    DistributedExecutor::new(scheduler_address.clone(), *workers)
                        .with_compression(compression),
                )
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutorBackend::Sequential(_) => "sequential",
            ExecutorBackend::Pool(_) => "pool",
            ExecutorBackend::Distributed(_) => "distributed",
        }
    }

    /// Maximum number of chunks in flight
    pub fn concurrency(&self) -> usize {
        match self {
            ExecutorBackend::Sequential(_) => 1,
            ExecutorBackend::Pool(pool) => pool.workers(),
            ExecutorBackend::Distributed(distributed) => distributed.workers(),
        }
    }

    pub fn run<A: Accumulator>(
        &self,
        chunks: Vec<Chunk>,
        task: Arc<dyn ChunkTask<A>>,
        ctx: ExecutionContext,
    ) -> Result<ChunkStream<A>, ConfigError> {
        match self {
            ExecutorBackend::Sequential(sequential) => Ok(sequential.run(chunks, task, ctx)),
            ExecutorBackend::Pool(pool) => Ok(pool.run(chunks, task, ctx)),
            ExecutorBackend::Distributed(distributed) => distributed.run(chunks, task, ctx),
        }
    }
}

impl fmt::Debug for ExecutorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorBackend")
            .field("name", &self.name())
            .field("concurrency", &self.concurrency())
            .finish()
    }
}

/// Run one attempt inline, turning a panic into a permanent failure
pub(crate) fn execute_guarded<A>(task: &dyn ChunkTask<A>, chunk: &Chunk) -> Result<A, ChunkError> {
    match catch_unwind(AssertUnwindSafe(|| task.execute(chunk))) {
        Ok(result) => result,
        Err(payload) => Err(ChunkError::permanent(format!(
            "processing panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Run one attempt on the blocking thread pool
///
/// The thread holds a slot of `slots` until it returns, even when the
/// awaiting future is dropped by a timeout first.
pub(crate) async fn run_blocking<A: Send + 'static>(
    task: Arc<dyn ChunkTask<A>>,
    chunk: Chunk,
    slots: Arc<Semaphore>,
) -> Result<A, ChunkError> {
    let slot = slots
        .acquire_owned()
        .await
        .map_err(|_| ChunkError::permanent("worker slots closed"))?;
    tokio::task::spawn_blocking(move || {
        let _slot = slot;
        execute_guarded(task.as_ref(), &chunk)
    })
    .await
    .unwrap_or_else(|e| Err(ChunkError::permanent(format!("worker thread failed: {}", e))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panicky;

    impl ChunkTask<u64> for Panicky {
        fn execute(&self, chunk: &Chunk) -> Result<u64, ChunkError> {
            if chunk.start == 0 {
                panic!("bad chunk");
            }
            Ok(chunk.len())
        }
    }

    fn chunk(start: u64) -> Chunk {
        Chunk {
            index: 0,
            dataset: "A".to_string(),
            source: crate::plan::SourceDescriptor::new("a", None),
            start,
            stop: start + 3,
            chunk_in_source: 0,
            chunks_in_source: 1,
        }
    }

    #[test]
    fn test_panic_becomes_permanent_failure() {
        let err = execute_guarded(&Panicky, &chunk(0)).unwrap_err();
        assert_eq!(err.kind, FailureKind::Permanent);
        assert!(err.message.contains("bad chunk"));
        assert_eq!(execute_guarded(&Panicky, &chunk(5)).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let task: Arc<dyn ChunkTask<u64>> = Arc::new(Panicky);
        let slots = Arc::new(Semaphore::new(1));
        assert_eq!(run_blocking(task.clone(), chunk(1), slots.clone()).await.unwrap(), 3);
        assert!(run_blocking(task, chunk(0), slots.clone()).await.is_err());
        assert_eq!(slots.available_permits(), 1);
    }

    #[test]
    fn test_error_conversions_keep_kind() {
        let err: ChunkError = SourceError::transient("reset").into();
        assert_eq!(err.kind, FailureKind::Transient);
        let err: ChunkError = ProcessError::Logic("nope".into()).into();
        assert_eq!(err.kind, FailureKind::Permanent);
        assert_eq!(ChunkError::timeout(Duration::from_secs(1)).kind, FailureKind::Transient);
    }

    #[test]
    fn test_backend_from_config() {
        let backend = ExecutorBackend::from_config(&ExecutorConfig::Pool { workers: 3 });
        assert_eq!(backend.name(), "pool");
        assert_eq!(backend.concurrency(), 3);

        let backend = ExecutorBackend::from_config(&ExecutorConfig::Sequential);
        assert_eq!(backend.concurrency(), 1);

        let backend = ExecutorBackend::from_config(&ExecutorConfig::Distributed {
            scheduler_address: "inproc://test".to_string(),
            workers: 2,
            compression: Some(6),
        });
        assert_eq!(backend.name(), "distributed");
        assert_eq!(backend.concurrency(), 2);
    }

    #[test]
    fn test_failure_display() {
        let failure = ChunkFailure::exhausted("reset", 4);
        assert_eq!(failure.kind, FailureKind::Permanent);
        assert!(failure.to_string().contains("retries exhausted after 4 attempts"));
    }
}
