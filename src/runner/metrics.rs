use super::report::{ChunkStatus, JobReport};
use serde::{Deserialize, Serialize};

/// Aggregate numbers for one job, derived from its report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub executor: String,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    pub chunks_cancelled: usize,
    /// Chunks that needed more than one attempt
    pub chunks_retried: usize,
    pub attempts_total: usize,
    /// Items covered by successful chunks
    pub items_processed: u64,
    /// Sum of attempt durations across all chunks
    pub processing_time_ms: u64,
    pub wall_time_ms: u64,
    pub sources_unavailable: usize,
}

impl JobMetrics {
    pub fn from_report(report: &JobReport) -> Self {
        let mut metrics = JobMetrics {
            executor: report.executor.clone(),
            chunks_total: report.chunks.len(),
            sources_unavailable: report.unavailable_sources.len(),
            wall_time_ms: report
                .wall_time()
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            ..JobMetrics::default()
        };

        for record in report.chunks.values() {
            match record.status {
                ChunkStatus::Succeeded => {
                    metrics.chunks_succeeded += 1;
                    metrics.items_processed += record.items;
                }
                ChunkStatus::Failed => metrics.chunks_failed += 1,
                ChunkStatus::Cancelled => metrics.chunks_cancelled += 1,
                ChunkStatus::Pending => {}
            }
            if record.attempts.len() > 1 {
                metrics.chunks_retried += 1;
            }
            metrics.attempts_total += record.attempts.len();
            metrics.processing_time_ms += record.processing_time_ms();
        }

        metrics
    }

    /// Items per second of wall time
    pub fn throughput(&self) -> f64 {
        if self.wall_time_ms == 0 {
            return 0.0;
        }
        self.items_processed as f64 / (self.wall_time_ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::plan::{Chunk, SourceDescriptor};
    use crate::runner::report::{AttemptRecord, JobReport, ReportHandle};
    use crate::runner::state::JobState;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_from_report() {
        let chunks: Vec<Chunk> = (0..3)
            .map(|i| Chunk {
                index: i,
                dataset: "A".to_string(),
                source: SourceDescriptor::new("a", None),
                start: i as u64 * 5,
                stop: i as u64 * 5 + 5,
                chunk_in_source: i,
                chunks_in_source: 3,
            })
            .collect();
        let handle = ReportHandle::new(JobReport::new(Uuid::new_v4(), "pool"));
        handle.register_chunks(&chunks);

        handle.record_attempt(
            0,
            AttemptRecord::failure(1, FailureKind::Transient, "x", Duration::from_millis(4)),
        );
        handle.record_attempt(0, AttemptRecord::success(2, Duration::from_millis(6)));
        handle.record_completion(0, None, Duration::from_millis(10));
        handle.record_attempt(1, AttemptRecord::success(1, Duration::from_millis(1)));
        handle.record_completion(1, None, Duration::from_millis(1));
        handle.mark_pending_cancelled();

        let metrics = JobMetrics::from_report(&handle.finalize(JobState::Aborted, None));
        assert_eq!(metrics.executor, "pool");
        assert_eq!(metrics.chunks_total, 3);
        assert_eq!(metrics.chunks_succeeded, 2);
        assert_eq!(metrics.chunks_cancelled, 1);
        assert_eq!(metrics.chunks_retried, 1);
        assert_eq!(metrics.attempts_total, 3);
        assert_eq!(metrics.items_processed, 10);
        assert_eq!(metrics.processing_time_ms, 11);
    }
}
