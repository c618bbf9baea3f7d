//! Data source collaborator interface
//!
//! A data source knows how to measure a source (`probe_length`) and how to
//! turn a [`Chunk`] into the event view a processor consumes (`open`). It
//! also decides which of its failures are worth retrying.

mod lines;

pub use lines::{LineEvents, LineFileSource};

use crate::error::FailureKind;
use crate::plan::{Chunk, SourceDescriptor};
use std::io;
use thiserror::Error;

/// Failure raised by a data source, tagged transient or permanent
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SourceError {
    pub kind: FailureKind,
    pub message: String,
}

impl SourceError {
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

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Classify an I/O error: interruptions, timeouts and dropped
    /// connections are transient, everything else is permanent.
    pub fn from_io(context: &str, err: &io::Error) -> Self {
        let message = format!("{}: {}", context, err);
        match err.kind() {
            io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::transient(message),
            _ => Self::permanent(message),
        }
    }
}

/// External data-source collaborator
pub trait DataSource: Send + Sync + 'static {
    /// Event view handed to the processor for one chunk
    type Events: Send + 'static;

    /// Determine the total item count of a source
    fn probe_length(&self, source: &SourceDescriptor) -> Result<u64, SourceError>;

    /// Materialize the items `[chunk.start, chunk.stop)` of the chunk's source
    fn open(&self, chunk: &Chunk) -> Result<Self::Events, SourceError>;
}
