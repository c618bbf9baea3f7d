//! Per-job record of every chunk and every attempt
//!
//! The report is the only state touched concurrently during dispatch. It
//! lives behind a single mutex in [`ReportHandle`]; all mutation goes
//! through the handle's `record_*` methods.

use super::state::JobState;
use crate::error::{AbortReason, FailureKind, JobError};
use crate::executor::ChunkFailure;
use crate::plan::{Chunk, ChunkId, UnavailableSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// One attempt at one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn success(attempt: u32, duration: Duration) -> Self {
        Self {
            attempt,
            succeeded: true,
            kind: None,
            message: None,
            duration_ms: duration.as_millis() as u64,
            at: Utc::now(),
        }
    }

    pub fn failure(attempt: u32, kind: FailureKind, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            attempt,
            succeeded: false,
            kind: Some(kind),
            message: Some(message.into()),
            duration_ms: duration.as_millis() as u64,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
    /// Never completed because the job was cancelled or aborted
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk: ChunkId,
    pub status: ChunkStatus,
    pub attempts: Vec<AttemptRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ChunkFailure>,
    /// Items covered by the chunk
    pub items: u64,
    pub wall_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ChunkRecord {
    fn new(chunk: &Chunk) -> Self {
        Self {
            chunk: chunk.id(),
            status: ChunkStatus::Pending,
            attempts: Vec::new(),
            failure: None,
            items: chunk.len(),
            wall_time_ms: 0,
            started_at: None,
            finished_at: None,
        }
    }

    /// Summed duration of all attempts
    pub fn processing_time_ms(&self) -> u64 {
        self.attempts.iter().map(|a| a.duration_ms).sum()
    }
}

/// Outcome of a whole job, chunk by chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub executor: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub chunks: BTreeMap<usize, ChunkRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable_sources: Vec<UnavailableSource>,
}

impl JobReport {
    pub fn new(job_id: Uuid, executor: impl Into<String>) -> Self {
        Self {
            job_id,
            executor: executor.into(),
            state: JobState::Idle,
            abort_reason: None,
            started_at: Utc::now(),
            finished_at: None,
            chunks: BTreeMap::new(),
            unavailable_sources: Vec::new(),
        }
    }

    pub fn chunk(&self, index: usize) -> Option<&ChunkRecord> {
        self.chunks.get(&index)
    }

    pub fn count(&self, status: ChunkStatus) -> usize {
        self.chunks.values().filter(|r| r.status == status).count()
    }

    /// Chunks that ended with a failure, in index order
    pub fn failures(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.chunks
            .values()
            .filter(|r| r.status == ChunkStatus::Failed)
    }

    /// Failed chunks whose failure is permanent (including exhausted retries)
    pub fn permanent_failures(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.failures().filter(|r| {
            r.failure
                .as_ref()
                .is_some_and(|f| f.kind == FailureKind::Permanent)
        })
    }

    /// Every recorded failure as a [`JobError`]: unavailable sources first,
    /// then failed chunks in index order
    pub fn errors(&self) -> Vec<JobError> {
        let sources = self
            .unavailable_sources
            .iter()
            .map(|s| JobError::SourceUnavailable {
                dataset: s.dataset.clone(),
                location: s.location.clone(),
                reason: s.reason.clone(),
            });

        let chunks = self.failures().filter_map(|record| {
            let failure = record.failure.as_ref()?;
            Some(match failure.kind {
                FailureKind::Permanent => JobError::PermanentChunkFailure {
                    chunk: record.chunk.clone(),
                    attempts: failure.attempts,
                    message: failure.message.clone(),
                },
                FailureKind::Transient => JobError::TransientChunkFailure {
                    chunk: record.chunk.clone(),
                    attempt: failure.attempts,
                    message: failure.message.clone(),
                },
            })
        });

        sources.chain(chunks).collect()
    }

    pub fn wall_time(&self) -> Option<Duration> {
        let finished = self.finished_at?;
        (finished - self.started_at).to_std().ok()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Shared, lock-guarded handle to a [`JobReport`]
#[derive(Debug, Clone)]
pub struct ReportHandle {
    inner: Arc<Mutex<JobReport>>,
}

impl ReportHandle {
    pub fn new(report: JobReport) -> Self {
        Self {
            inner: Arc::new(Mutex::new(report)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobReport> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut JobReport) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn set_state(&self, state: JobState) {
        self.mutate(|report| report.state = state);
    }

    pub fn register_chunks(&self, chunks: &[Chunk]) {
        self.mutate(|report| {
            for chunk in chunks {
                report.chunks.insert(chunk.index, ChunkRecord::new(chunk));
            }
        });
    }

    pub fn record_unavailable(&self, sources: &[UnavailableSource]) {
        self.mutate(|report| report.unavailable_sources.extend_from_slice(sources));
    }

    /// Append one attempt to the chunk's history
    pub fn record_attempt(&self, index: usize, attempt: AttemptRecord) {
        self.mutate(|report| {
            if let Some(record) = report.chunks.get_mut(&index) {
                if record.started_at.is_none() {
                    record.started_at = Some(attempt.at);
                }
                record.attempts.push(attempt);
            }
        });
    }

    /// Close the chunk's record with its final outcome
    pub fn record_completion(&self, index: usize, failure: Option<&ChunkFailure>, elapsed: Duration) {
        self.mutate(|report| {
            if let Some(record) = report.chunks.get_mut(&index) {
                record.status = match failure {
                    None => ChunkStatus::Succeeded,
                    Some(_) => ChunkStatus::Failed,
                };
                record.failure = failure.cloned();
                record.wall_time_ms = elapsed.as_millis() as u64;
                record.finished_at = Some(Utc::now());
            }
        });
    }

    /// Mark every chunk still pending as cancelled; returns how many
    pub fn mark_pending_cancelled(&self) -> usize {
        self.mutate(|report| {
            let mut count = 0;
            for record in report.chunks.values_mut() {
                if record.status == ChunkStatus::Pending {
                    record.status = ChunkStatus::Cancelled;
                    count += 1;
                }
            }
            count
        })
    }

    /// Stamp the terminal state and return the finished report
    pub fn finalize(&self, state: JobState, abort_reason: Option<AbortReason>) -> JobReport {
        self.mutate(|report| {
            report.state = state;
            report.abort_reason = abort_reason;
            report.finished_at = Some(Utc::now());
            report.clone()
        })
    }

    pub fn snapshot(&self) -> JobReport {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SourceDescriptor;

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                index: i,
                dataset: "A".to_string(),
                source: SourceDescriptor::new("a.txt", None).with_length(10 * n as u64),
                start: 10 * i as u64,
                stop: 10 * (i as u64 + 1),
                chunk_in_source: i,
                chunks_in_source: n,
            })
            .collect()
    }

    #[test]
    fn test_attempts_and_completion() {
        let handle = ReportHandle::new(JobReport::new(Uuid::new_v4(), "sequential"));
        handle.register_chunks(&chunks(2));

        handle.record_attempt(
            0,
            AttemptRecord::failure(1, FailureKind::Transient, "reset", Duration::from_millis(3)),
        );
        handle.record_attempt(0, AttemptRecord::success(2, Duration::from_millis(5)));
        handle.record_completion(0, None, Duration::from_millis(9));

        let failure = ChunkFailure::new(FailureKind::Permanent, "bad data", 1);
        handle.record_attempt(
            1,
            AttemptRecord::failure(1, FailureKind::Permanent, "bad data", Duration::from_millis(1)),
        );
        handle.record_completion(1, Some(&failure), Duration::from_millis(1));

        let report = handle.finalize(JobState::Done, None);
        let first = report.chunk(0).unwrap();
        assert_eq!(first.status, ChunkStatus::Succeeded);
        assert_eq!(first.attempts.len(), 2);
        assert_eq!(first.processing_time_ms(), 8);
        assert_eq!(first.items, 10);

        assert_eq!(report.count(ChunkStatus::Failed), 1);
        assert_eq!(report.permanent_failures().count(), 1);
        let errors = report.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            JobError::PermanentChunkFailure { chunk, attempts: 1, .. } if chunk.index == 1
        ));
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_mark_pending_cancelled() {
        let handle = ReportHandle::new(JobReport::new(Uuid::new_v4(), "pool"));
        handle.register_chunks(&chunks(3));
        handle.record_completion(1, None, Duration::ZERO);

        assert_eq!(handle.mark_pending_cancelled(), 2);
        let report = handle.finalize(JobState::Aborted, Some(AbortReason::Cancelled));
        assert_eq!(report.count(ChunkStatus::Cancelled), 2);
        assert_eq!(report.abort_reason, Some(AbortReason::Cancelled));
    }

    #[test]
    fn test_report_json_round_trip() {
        let handle = ReportHandle::new(JobReport::new(Uuid::new_v4(), "pool"));
        handle.register_chunks(&chunks(1));
        handle.record_attempt(0, AttemptRecord::success(1, Duration::from_millis(2)));
        handle.record_completion(0, None, Duration::from_millis(2));
        let report = handle.finalize(JobState::Done, None);

        let json = report.to_json().unwrap();
        assert!(json.contains("\"state\": \"done\""));
        let parsed: JobReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
