//! Progress observers
//!
//! Observers only see counts and chunk identities. They never touch
//! accumulators, so they cannot influence the result.

use super::state::JobState;
use crate::plan::ChunkId;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{debug, info};

pub trait ProgressObserver: Send + Sync {
    /// Dispatch is about to begin
    fn on_start(&self, _total: usize) {}

    /// A chunk finished; `completed` is monotonic and ends at `total`
    fn on_chunk_complete(&self, completed: usize, total: usize, chunk: &ChunkId, succeeded: bool);

    fn on_finish(&self, _state: JobState) {}
}

/// Discards every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_chunk_complete(&self, _completed: usize, _total: usize, _chunk: &ChunkId, _succeeded: bool) {}
}

/// Reports progress through `tracing`
#[derive(Debug, Clone)]
pub struct LogProgress {
    every: usize,
}

impl LogProgress {
    /// Log at info level every `every` completions (and at the last one)
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ProgressObserver for LogProgress {
    fn on_start(&self, total: usize) {
        info!("Dispatching {} chunk(s)", total);
    }

    fn on_chunk_complete(&self, completed: usize, total: usize, chunk: &ChunkId, succeeded: bool) {
        if completed % self.every == 0 || completed == total {
            info!("Progress: {}/{} chunks", completed, total);
        } else {
            debug!(
                "Chunk {} {} ({}/{})",
                chunk,
                if succeeded { "done" } else { "failed" },
                completed,
                total
            );
        }
    }

    fn on_finish(&self, state: JobState) {
        info!("Job finished: {}", state);
    }
}

/// Terminal progress bar
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .map(|style| style.progress_chars("##-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }

    /// A bar that never draws, for tests and non-interactive output
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for BarProgress {
    fn on_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message("Processing chunks...");
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn on_chunk_complete(&self, completed: usize, _total: usize, chunk: &ChunkId, succeeded: bool) {
        self.bar.set_position(completed as u64);
        if !succeeded {
            self.bar.set_message(format!("chunk {} failed", chunk.index));
        }
    }

    fn on_finish(&self, state: JobState) {
        self.bar.finish_with_message(format!("Job {}", state));
    }
}
