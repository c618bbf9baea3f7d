//! Distributed execution through a remote scheduler
//!
//! Chunks travel as [`TaskEnvelope`]s and results come back as
//! [`ResultEnvelope`]s. Payloads are JSON, optionally deflate-compressed.
//! The scheduler itself sits behind the narrow [`RemoteScheduler`] trait;
//! [`InProcessScheduler`] serves `inproc://` addresses by handing envelopes
//! to a [`RemoteWorker`] on the local blocking pool, going through the same
//! serialized form a network transport would.

use super::pool::spawn_bounded;
use super::{execute_guarded, ChunkError, ChunkStream, ExecutionContext};
use crate::accumulator::Accumulator;
use crate::config::ConfigError;
use crate::error::FailureKind;
use crate::plan::Chunk;
use crate::processor::ChunkTask;
use async_trait::async_trait;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Address scheme served by [`InProcessScheduler`]
pub const INPROC_SCHEME: &str = "inproc://";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Scheduler {address} unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("Failed to encode payload: {0}")]
    Encode(String),

    #[error("Failed to decode payload: {0}")]
    Decode(String),
}

impl TransportError {
    /// Delivery problems may clear up; malformed payloads will not
    pub fn kind(&self) -> FailureKind {
        match self {
            TransportError::Unreachable { .. } => FailureKind::Transient,
            TransportError::Encode(_) | TransportError::Decode(_) => FailureKind::Permanent,
        }
    }
}

impl From<TransportError> for ChunkError {
    fn from(err: TransportError) -> Self {
        ChunkError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    None,
    Deflate {
        level: u32,
    },
}

/// Serialize `value` to JSON, compressing as requested
pub fn encode_payload<T: Serialize>(value: &T, compression: Compression) -> Result<Vec<u8>, TransportError> {
    let json = serde_json::to_vec(value).map_err(|e| TransportError::Encode(e.to_string()))?;
    match compression {
        Compression::None => Ok(json),
        Compression::Deflate { level } => {
            let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
            encoder
                .write_all(&json)
                .map_err(|e| TransportError::Encode(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| TransportError::Encode(e.to_string()))
        }
    }
}

pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8], compression: Compression) -> Result<T, TransportError> {
    let json = match compression {
        Compression::None => bytes.to_vec(),
        Compression::Deflate { .. } => {
            let mut json = Vec::new();
            DeflateDecoder::new(bytes)
                .read_to_end(&mut json)
                .map_err(|e| TransportError::Decode(e.to_string()))?;
            json
        }
    };
    serde_json::from_slice(&json).map_err(|e| TransportError::Decode(e.to_string()))
}

/// One chunk on its way to a remote worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: Uuid,
    pub chunk_index: usize,
    pub compression: Compression,
    /// Encoded [`Chunk`]
    pub payload: Vec<u8>,
}

impl TaskEnvelope {
    pub fn new(chunk: &Chunk, compression: Compression) -> Result<Self, TransportError> {
        Ok(Self {
            task_id: Uuid::new_v4(),
            chunk_index: chunk.index,
            compression,
            payload: encode_payload(chunk, compression)?,
        })
    }

    pub fn chunk(&self) -> Result<Chunk, TransportError> {
        decode_payload(&self.payload, self.compression)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RemoteOutcome {
    /// Encoded accumulator
    Completed { payload: Vec<u8> },
    Failed { kind: FailureKind, message: String },
}

/// A worker's answer to one [`TaskEnvelope`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub task_id: Uuid,
    pub compression: Compression,
    pub outcome: RemoteOutcome,
}

impl ResultEnvelope {
    pub fn completed<A: Serialize>(task_id: Uuid, value: &A, compression: Compression) -> Self {
        let outcome = match encode_payload(value, compression) {
            Ok(payload) => RemoteOutcome::Completed { payload },
            Err(e) => RemoteOutcome::Failed {
                kind: FailureKind::Permanent,
                message: e.to_string(),
            },
        };
        Self {
            task_id,
            compression,
            outcome,
        }
    }

    pub fn failed(task_id: Uuid, error: &ChunkError, compression: Compression) -> Self {
        Self {
            task_id,
            compression,
            outcome: RemoteOutcome::Failed {
                kind: error.kind,
                message: error.message.clone(),
            },
        }
    }

    pub fn into_result<A: DeserializeOwned>(self) -> Result<A, ChunkError> {
        match self.outcome {
            RemoteOutcome::Completed { payload } => Ok(decode_payload(&payload, self.compression)?),
            RemoteOutcome::Failed { kind, message } => Err(ChunkError { kind, message }),
        }
    }
}

/// Client side of a scheduler that runs tasks on remote workers
#[async_trait]
pub trait RemoteScheduler: Send + Sync {
    fn address(&self) -> &str;

    /// Run one task and wait for its result
    async fn submit(&self, task: TaskEnvelope) -> Result<ResultEnvelope, TransportError>;
}

/// Worker side: decodes a task, runs it, encodes the result
pub struct RemoteWorker<A> {
    task: Arc<dyn ChunkTask<A>>,
}

impl<A: Accumulator> RemoteWorker<A> {
    pub fn new(task: Arc<dyn ChunkTask<A>>) -> Self {
        Self { task }
    }

    pub fn handle(&self, envelope: TaskEnvelope) -> ResultEnvelope {
        let chunk = match envelope.chunk() {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Rejecting undecodable task {}: {}", envelope.task_id, e);
                return ResultEnvelope::failed(envelope.task_id, &ChunkError::from(e), envelope.compression);
            }
        };

        match execute_guarded(self.task.as_ref(), &chunk) {
            Ok(value) => ResultEnvelope::completed(envelope.task_id, &value, envelope.compression),
            Err(e) => ResultEnvelope::failed(envelope.task_id, &e, envelope.compression),
        }
    }
}

type Handler = Arc<dyn Fn(TaskEnvelope) -> ResultEnvelope + Send + Sync>;

/// Scheduler whose workers live in this process
#[derive(Clone)]
pub struct InProcessScheduler {
    address: String,
    handler: Handler,
}

impl InProcessScheduler {
    pub fn new<F>(address: impl Into<String>, handler: F) -> Self
    where
        F: Fn(TaskEnvelope) -> ResultEnvelope + Send + Sync + 'static,
    {
        Self {
            address: address.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn for_worker<A: Accumulator>(address: impl Into<String>, worker: RemoteWorker<A>) -> Self {
        Self::new(address, move |task| worker.handle(task))
    }
}

impl fmt::Debug for InProcessScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessScheduler")
            .field("address", &self.address)
            .finish()
    }
}

#[async_trait]
impl RemoteScheduler for InProcessScheduler {
    fn address(&self) -> &str {
        &self.address
    }

    async fn submit(&self, task: TaskEnvelope) -> Result<ResultEnvelope, TransportError> {
        let wire = serde_json::to_vec(&task).map_err(|e| TransportError::Encode(e.to_string()))?;
        let handler = self.handler.clone();
        let address = self.address.clone();

        let reply = tokio::task::spawn_blocking(move || {
            let task: TaskEnvelope =
                serde_json::from_slice(&wire).map_err(|e| TransportError::Decode(e.to_string()))?;
            serde_json::to_vec(&handler(task)).map_err(|e| TransportError::Encode(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::Unreachable {
            address,
            reason: e.to_string(),
        })??;

        serde_json::from_slice(&reply).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Ships chunks to remote workers, at most `workers` at a time
#[derive(Clone)]
pub struct DistributedExecutor {
    address: String,
    workers: usize,
    compression: Compression,
    scheduler: Option<Arc<dyn RemoteScheduler>>,
}

impl DistributedExecutor {
    pub fn new(address: impl Into<String>, workers: usize) -> Self {
        Self {
            address: address.into(),
            workers: workers.max(1),
            compression: Compression::None,
            scheduler: None,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Use an explicit scheduler client instead of resolving the address
    pub fn with_scheduler(mut self, scheduler: Arc<dyn RemoteScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn run<A: Accumulator>(
        &self,
        chunks: Vec<Chunk>,
        task: Arc<dyn ChunkTask<A>>,
        ctx: ExecutionContext,
    ) -> Result<ChunkStream<A>, ConfigError> {
        let scheduler: Arc<dyn RemoteScheduler> = match &self.scheduler {
            Some(scheduler) => scheduler.clone(),
            None if self.address.starts_with(INPROC_SCHEME) => Arc::new(
                InProcessScheduler::for_worker(self.address.clone(), RemoteWorker::new(task)),
            ),
            None => {
                return Err(ConfigError::UnsupportedScheduler {
                    address: self.address.clone(),
                })
            }
        };
        debug!(
            "Submitting {} chunk(s) to scheduler {}",
            chunks.len(),
            scheduler.address()
        );

        let compression = self.compression;
        Ok(spawn_bounded(chunks, self.workers, ctx, move |chunk| {
            let scheduler = scheduler.clone();
            async move { submit_chunk(scheduler.as_ref(), &chunk, compression).await }
        }))
    }
}

impl fmt::Debug for DistributedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedExecutor")
            .field("address", &self.address)
            .field("workers", &self.workers)
            .field("compression", &self.compression)
            .field("custom_scheduler", &self.scheduler.is_some())
            .finish()
    }
}

async fn submit_chunk<A: DeserializeOwned>(
    scheduler: &dyn RemoteScheduler,
    chunk: &Chunk,
    compression: Compression,
) -> Result<A, ChunkError> {
    let envelope = TaskEnvelope::new(chunk, compression)?;
    let task_id = envelope.task_id;
    let reply = scheduler.submit(envelope).await?;
    if reply.task_id != task_id {
        return Err(ChunkError::transient(format!(
            "scheduler answered task {} with result for {}",
            task_id, reply.task_id
        )));
    }
    reply.into_result()
}
