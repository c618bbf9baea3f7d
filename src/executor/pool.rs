use super::{execute_with_retry, run_blocking, ChunkCompletion, ChunkError, ChunkStream, ExecutionContext};
use crate::accumulator::Accumulator;
use crate::plan::Chunk;
use crate::processor::ChunkTask;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Fixed-size local worker pool
///
/// At most `workers` chunks are in flight; each attempt runs on a blocking
/// thread. Completions are yielded in the order they finish.
///
/// A blocking thread cannot be interrupted, so an attempt that times out
/// keeps running in the background. Each thread holds a worker slot until
/// it actually returns, which means a retry (or the next chunk) waits for a
/// free slot and never pushes the number of running attempts past
/// `workers`. That wait counts against the retry's own timeout.
#[derive(Debug, Clone, Copy)]
pub struct PoolExecutor {
    workers: usize,
}

impl PoolExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn run<A: Accumulator>(
        &self,
        chunks: Vec<Chunk>,
        task: Arc<dyn ChunkTask<A>>,
        ctx: ExecutionContext,
    ) -> ChunkStream<A> {
        let threads = Arc::new(Semaphore::new(self.workers));
        spawn_bounded(chunks, self.workers, ctx, move |chunk| {
            run_blocking(task.clone(), chunk, threads.clone())
        })
    }
}

/// Dispatch every chunk through `attempt` with at most `concurrency` in flight
///
/// A dispatcher task acquires a semaphore permit per chunk, so no chunk is
/// started after cancellation or after the consumer drops the stream.
pub(crate) fn spawn_bounded<A, F, Fut>(
    chunks: Vec<Chunk>,
    concurrency: usize,
    ctx: ExecutionContext,
    attempt: F,
) -> ChunkStream<A>
where
    A: Send + 'static,
    F: Fn(Chunk) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<A, ChunkError>> + Send + 'static,
{
    let concurrency = concurrency.max(1);
    let (tx, rx) = mpsc::channel::<ChunkCompletion<A>>(concurrency);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    tokio::spawn(async move {
        for chunk in chunks {
            let permit = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if ctx.cancel.is_cancelled() || tx.is_closed() {
                break;
            }

            debug!("Dispatching chunk {}", chunk.id());
            let tx = tx.clone();
            let ctx = ctx.clone();
            let attempt = attempt.clone();
            tokio::spawn(async move {
                let completion = execute_with_retry(chunk, &ctx, attempt).await;
                drop(permit);
                let _ = tx.send(completion).await;
            });
        }
        debug!("Dispatcher finished");
    });

    ReceiverStream::new(rx).boxed()
}
