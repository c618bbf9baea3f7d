//! Processing function collaborator interface
//!
//! A [`Processor`] maps the event view of one chunk to one accumulator and
//! may transform the final, fully merged accumulator once in `postprocess`.
//! [`SourceTask`] glues a data source and a processor into the
//! `chunk -> process(open(chunk))` closure executors run.

mod column_stats;

pub use column_stats::{ColumnStatsProcessor, ColumnSummary};

use crate::accumulator::Accumulator;
use crate::error::FailureKind;
use crate::executor::ChunkError;
use crate::plan::Chunk;
use crate::source::DataSource;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by a processing function
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// Deterministic logic error; never retried
    #[error("{0}")]
    Logic(String),

    /// Failure the processor knows to be retryable
    #[error("{0}")]
    Transient(String),
}

impl ProcessError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProcessError::Logic(_) => FailureKind::Permanent,
            ProcessError::Transient(_) => FailureKind::Transient,
        }
    }
}

/// User-supplied processing function over events of type `E`
pub trait Processor<E>: Send + Sync + 'static {
    type Output: Accumulator;

    /// Process the events of one chunk
    fn process(&self, chunk: &Chunk, events: E) -> Result<Self::Output, ProcessError>;

    /// Transform the final accumulator; called once, after all merging
    fn postprocess(&self, accumulator: Self::Output) -> Self::Output {
        accumulator
    }
}

/// One attempt at turning a chunk into an accumulator
pub trait ChunkTask<A>: Send + Sync {
    fn execute(&self, chunk: &Chunk) -> Result<A, ChunkError>;
}

/// `process(open(chunk))` over a concrete source and processor
pub struct SourceTask<S, P> {
    source: Arc<S>,
    processor: Arc<P>,
}

impl<S, P> SourceTask<S, P> {
    pub fn new(source: Arc<S>, processor: Arc<P>) -> Self {
        Self { source, processor }
    }
}

impl<S, P> ChunkTask<P::Output> for SourceTask<S, P>
where
    S: DataSource,
    P: Processor<S::Events>,
{
    fn execute(&self, chunk: &Chunk) -> Result<P::Output, ChunkError> {
        let events = self.source.open(chunk)?;
        Ok(self.processor.process(chunk, events)?)
    }
}
