use super::{
    execute_guarded, execute_with_retry, run_blocking, ChunkStream, ExecutionContext,
};
use crate::accumulator::Accumulator;
use crate::plan::Chunk;
use crate::processor::ChunkTask;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Runs chunks one after another, each only when the stream is polled
///
/// Without a timeout the work happens on the polling task itself. With a
/// timeout each attempt moves to a blocking thread so it can be abandoned;
/// an abandoned thread still has to return before the next attempt starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialExecutor;

impl SequentialExecutor {
    pub fn run<A: Accumulator>(
        &self,
        chunks: Vec<Chunk>,
        task: Arc<dyn ChunkTask<A>>,
        ctx: ExecutionContext,
    ) -> ChunkStream<A> {
        let slot = Arc::new(Semaphore::new(1));
        stream::unfold(
            (chunks.into_iter(), task, ctx, slot),
            |(mut chunks, task, ctx, slot)| async move {
                if ctx.cancel.is_cancelled() {
                    debug!("Cancellation requested, no further chunks dispatched");
                    return None;
                }
                let chunk = chunks.next()?;
                debug!("Dispatching chunk {}", chunk.id());

                let completion = if ctx.chunk_timeout.is_some() {
                    execute_with_retry(chunk, &ctx, |c| run_blocking(task.clone(), c, slot.clone()))
                        .await
                } else {
                    execute_with_retry(chunk, &ctx, |c| {
                        let result = execute_guarded(task.as_ref(), &c);
                        async move { result }
                    })
                    .await
                };

                Some((completion, (chunks, task, ctx, slot)))
            },
        )
        .boxed()
    }
}
