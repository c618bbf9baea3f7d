//! End-to-end runner behaviour across executors

use chunkflow::accumulator::{Accumulator, ReductionOrder};
use chunkflow::config::{BackoffConfig, ExecutorConfig, RunnerConfig};
use chunkflow::error::{AbortReason, FailureKind, JobError};
use chunkflow::executor::{Compression, DistributedExecutor, ExecutorBackend};
use chunkflow::plan::{Dataset, Fileset};
use chunkflow::processor::ColumnStatsProcessor;
use chunkflow::runner::{BarProgress, ChunkStatus, JobState, Runner};
use chunkflow::source::LineFileSource;
use chunkflow::testing::{item_value, LineFixture, MockProcessor, MockSource};
use std::sync::Arc;
use std::time::Duration;

fn fileset() -> Fileset {
    Fileset::new([
        Dataset::new("A", ["a1", "a2"]),
        Dataset::new("B", ["b1"]),
    ])
    .unwrap()
}

fn source() -> MockSource {
    MockSource::new()
        .with_source("a1", 2_500)
        .with_source("a2", 500)
        .with_source("b1", 1_234)
}

fn config(executor: ExecutorConfig) -> RunnerConfig {
    RunnerConfig {
        chunk_size: 300,
        executor,
        ..RunnerConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_executors_agree() {
    let expected_sum: f64 = (0..2_500)
        .chain(0..500)
        .chain(0..1_234)
        .map(item_value)
        .sum();

    let mut results = Vec::new();
    for executor in [
        ExecutorConfig::Sequential,
        ExecutorConfig::Pool { workers: 4 },
        ExecutorConfig::Distributed {
            scheduler_address: "inproc://test".to_string(),
            workers: 3,
            compression: Some(6),
        },
    ] {
        let runner = Runner::new(config(executor)).unwrap();
        let output = runner
            .run(&fileset(), Arc::new(source()), Arc::new(MockProcessor::new()))
            .await
            .unwrap();
        assert_eq!(output.report.state, JobState::Done);
        results.push(output.accumulator);
    }

    let sequential = &results[0];
    assert_eq!(sequential.items, 4_234);
    assert_eq!(sequential.chunks.len(), 9 + 2 + 5);
    assert!((sequential.sum - expected_sum).abs() < 1e-6 * expected_sum);
    // Chunk-index reduction makes local results bit-identical
    assert_eq!(&results[1], sequential);
    // Remote results cross a JSON boundary
    assert!(results[2].approx_eq(sequential));
    assert_eq!(results[2].chunks, sequential.chunks);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_arrival_order_is_within_tolerance() {
    let ordered = Runner::new(config(ExecutorConfig::Pool { workers: 4 }))
        .unwrap()
        .run(&fileset(), Arc::new(source()), Arc::new(MockProcessor::new()))
        .await
        .unwrap();
    let relaxed = Runner::new(RunnerConfig {
        order: ReductionOrder::Arrival,
        ..config(ExecutorConfig::Pool { workers: 4 })
    })
    .unwrap()
    .run(&fileset(), Arc::new(source()), Arc::new(MockProcessor::new()))
    .await
    .unwrap();

    assert!(ordered.accumulator.approx_eq(&relaxed.accumulator));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_permanent_failure_recorded_once_and_aborts() {
    let runner = Runner::new(config(ExecutorConfig::Pool { workers: 2 })).unwrap();
    let failure = runner
        .run(
            &fileset(),
            Arc::new(source()),
            Arc::new(MockProcessor::new().fail_on(4)),
        )
        .await
        .unwrap_err();

    assert!(failure.partial.is_none());
    assert!(matches!(
        failure.error.abort_reason(),
        Some(AbortReason::FailureBudgetExceeded { .. })
    ));
    let permanent: Vec<_> = failure
        .report
        .errors()
        .into_iter()
        .filter(|e| matches!(e, JobError::PermanentChunkFailure { .. }))
        .collect();
    assert_eq!(permanent.len(), 1);
    assert!(matches!(
        &permanent[0],
        JobError::PermanentChunkFailure { chunk, attempts: 1, .. } if chunk.index == 4
    ));
}

#[tokio::test]
async fn test_transient_twice_then_success_with_three_retries() {
    let runner = Runner::new(RunnerConfig {
        retries: 3,
        backoff: BackoffConfig::immediate(),
        ..config(ExecutorConfig::Sequential)
    })
    .unwrap();
    let output = runner
        .run(
            &fileset(),
            Arc::new(source().fail_transient("a1", 600, 2)),
            Arc::new(MockProcessor::new()),
        )
        .await
        .unwrap();

    assert_eq!(output.accumulator.items, 4_234);
    assert!(output.accumulator.chunks.contains(&2));
    let record = output.report.chunk(2).unwrap();
    assert_eq!(record.status, ChunkStatus::Succeeded);
    assert_eq!(record.attempts.len(), 3);
    assert!(record.attempts[..2]
        .iter()
        .all(|a| a.kind == Some(FailureKind::Transient)));
}

#[tokio::test]
async fn test_panicking_processor_is_a_permanent_failure() {
    let runner = Runner::new(RunnerConfig {
        max_failures: 1,
        retries: 2,
        ..config(ExecutorConfig::Sequential)
    })
    .unwrap();
    let output = runner
        .run(
            &fileset(),
            Arc::new(source()),
            Arc::new(MockProcessor::new().panic_on(0)),
        )
        .await
        .unwrap();

    let record = output.report.chunk(0).unwrap();
    assert_eq!(record.status, ChunkStatus::Failed);
    assert_eq!(record.attempts.len(), 1);
    assert!(record.failure.as_ref().unwrap().message.contains("panicked"));
    assert_eq!(output.accumulator.items, 4_234 - 300);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_mid_run_returns_partial_in_best_effort() {
    let source = source()
        .with_delay("a2", Duration::from_millis(200))
        .with_delay("b1", Duration::from_millis(200));
    let runner = Runner::new(RunnerConfig {
        best_effort: true,
        cancel_grace: Duration::from_secs(2),
        ..config(ExecutorConfig::Pool { workers: 2 })
    })
    .unwrap();

    let cancel = runner.cancellation();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let failure = runner
        .run(&fileset(), Arc::new(source), Arc::new(MockProcessor::new()))
        .await
        .unwrap_err();

    assert!(failure.error.is_cancellation());
    assert_eq!(failure.report.state, JobState::Aborted);
    let partial = failure.partial.expect("best-effort keeps the partial result");
    assert!(partial.items < 4_234);
    assert!(failure.report.count(ChunkStatus::Cancelled) > 0);
    assert_eq!(
        partial.items,
        failure
            .report
            .chunks
            .values()
            .filter(|r| r.status == ChunkStatus::Succeeded)
            .map(|r| r.items)
            .sum::<u64>()
    );
}

#[tokio::test]
async fn test_distributed_without_scheduler_client_is_a_configuration_error() {
    let runner = Runner::new(config(ExecutorConfig::Sequential))
        .unwrap()
        .with_executor(ExecutorBackend::Distributed(DistributedExecutor::new(
            "tcp://scheduler:8786",
            4,
        )));
    let failure = runner
        .run(&fileset(), Arc::new(source()), Arc::new(MockProcessor::new()))
        .await
        .unwrap_err();
    assert!(matches!(failure.error, JobError::Configuration(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_distributed_uncompressed_matches_sequential() {
    let distributed = Runner::new(config(ExecutorConfig::Sequential))
        .unwrap()
        .with_executor(ExecutorBackend::Distributed(
            DistributedExecutor::new("inproc://plain", 2).with_compression(Compression::None),
        ))
        .run(&fileset(), Arc::new(source()), Arc::new(MockProcessor::new()))
        .await
        .unwrap();
    let sequential = Runner::new(config(ExecutorConfig::Sequential))
        .unwrap()
        .run(&fileset(), Arc::new(source()), Arc::new(MockProcessor::new()))
        .await
        .unwrap();

    assert!(distributed.accumulator.approx_eq(&sequential.accumulator));
    assert_eq!(distributed.accumulator.items, sequential.accumulator.items);
    assert_eq!(distributed.metrics.executor, "distributed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_column_stats_over_line_files() {
    let mut fixture = LineFixture::new().unwrap();
    fixture.add_numbered_file("low", "low1.txt", 250).unwrap();
    fixture.add_numbered_file("low", "low2.txt", 50).unwrap();
    fixture.add_numbered_file("high", "high.txt", 1_000).unwrap();
    fixture
        .add_file("high", "noisy.txt", ["# header", "x 1000", "y oops", ""])
        .unwrap();
    let fileset = fixture.fileset().unwrap();

    let runner = Runner::new(RunnerConfig {
        chunk_size: 64,
        ..config(ExecutorConfig::Pool { workers: 3 })
    })
    .unwrap()
    .with_progress(Arc::new(BarProgress::hidden()));

    let processor = ColumnStatsProcessor::new(1).with_histogram(10, 0.0, 1_000.0);
    let output = runner
        .run(&fileset, Arc::new(LineFileSource::new()), Arc::new(processor))
        .await
        .unwrap();

    let low = &output.accumulator["low"];
    assert_eq!(low.values.count, 300);
    assert_eq!(low.values.min, Some(0.0));
    assert_eq!(low.values.max, Some(249.0));

    let high = &output.accumulator["high"];
    assert_eq!(high.values.count, 1_001);
    assert_eq!(high.malformed, 1);
    assert_eq!(high.histogram.overflow, 1.0);
    assert_eq!(high.histogram.counts.iter().sum::<f64>(), 1_000.0);
    assert_eq!(output.metrics.items_processed, 250 + 50 + 1_000 + 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_column_stats_agree_on_odd_text_across_executors() {
    let mut fixture = LineFixture::new().unwrap();
    fixture
        .add_file("A", "special.txt", ["x 1", "y nan", "z 2", "w inf", "v 1e400"])
        .unwrap();
    fixture
        .add_raw_file("A", "binary.txt", b"x 1\ny \xff\xfe 5\nz 2\n")
        .unwrap();
    let fileset = fixture.fileset().unwrap();

    let mut results = Vec::new();
    for executor in [
        ExecutorConfig::Sequential,
        ExecutorConfig::Distributed {
            scheduler_address: "inproc://odd-text".to_string(),
            workers: 2,
            compression: None,
        },
    ] {
        let runner = Runner::new(RunnerConfig {
            chunk_size: 2,
            ..config(executor)
        })
        .unwrap();
        let output = runner
            .run(
                &fileset,
                Arc::new(LineFileSource::new()),
                Arc::new(ColumnStatsProcessor::new(1)),
            )
            .await
            .unwrap();
        assert_eq!(output.metrics.chunks_failed, 0);
        results.push(output.accumulator);
    }

    for summaries in &results {
        let summary = &summaries["A"];
        assert_eq!(summary.values.count, 4);
        assert_eq!(summary.values.sum, 6.0);
        assert_eq!(summary.malformed, 4);
    }
    assert!(results[0].approx_eq(&results[1]));
}
