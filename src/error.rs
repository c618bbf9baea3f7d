//! Job-level error taxonomy
//!
//! Planning, chunk execution and orchestration failures all surface to the
//! caller of [`Runner::run`](crate::runner::Runner::run) as a [`JobError`].
//! Component-specific errors (`SourceError`, `ProcessError`, `PlanError`,
//! `ConfigError`, `TransportError`) convert into it at the runner boundary.

use crate::config::ConfigError;
use crate::plan::{ChunkId, PlanError};
use crate::runner::state::StateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Whether a failure may succeed when attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// I/O or network class failure; eligible for retry
    Transient,
    /// Logic error or unrecoverable source problem; never retried
    Permanent,
}

impl FailureKind {
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Why a job ended in the `Aborted` state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum AbortReason {
    /// An external cancellation request was received
    Cancelled,
    /// More chunks (or sources) failed than the configured budget tolerates
    FailureBudgetExceeded {
        failures: usize,
        budget: usize,
        last_error: String,
    },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::FailureBudgetExceeded {
                failures,
                budget,
                last_error,
            } => write!(
                f,
                "{} failure(s) exceeded the budget of {} (last: {})",
                failures, budget, last_error
            ),
        }
    }
}

/// Main error type for job execution
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Source {location} in dataset {dataset} unavailable: {reason}")]
    SourceUnavailable {
        dataset: String,
        location: String,
        reason: String,
    },

    #[error("Chunk {chunk} attempt {attempt} failed (transient): {message}")]
    TransientChunkFailure {
        chunk: ChunkId,
        attempt: u32,
        message: String,
    },

    #[error("Chunk {chunk} failed permanently after {attempts} attempt(s): {message}")]
    PermanentChunkFailure {
        chunk: ChunkId,
        attempts: u32,
        message: String,
    },

    #[error("Planning failed: {reason}")]
    PlanningError { reason: String },

    #[error("Job aborted: {reason}")]
    JobAborted { reason: AbortReason },

    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Invalid job state: {0}")]
    InvalidState(#[from] StateError),
}

impl JobError {
    /// The abort reason, if this error ended the job early
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            JobError::JobAborted { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self.abort_reason(), Some(AbortReason::Cancelled))
    }
}

impl From<PlanError> for JobError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::InvalidChunkSize => JobError::PlanningError {
                reason: err.to_string(),
            },
            PlanError::SourceUnavailable { .. } => JobError::PlanningError {
                reason: format!("fail-fast planning stopped: {}", err),
            },
        }
    }
}
