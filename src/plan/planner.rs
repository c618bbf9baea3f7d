//! Pure chunk planning
//!
//! Planning is deterministic: the same fileset, chunk size and probed
//! lengths always produce the same chunk sequence, which is what allows a
//! specific chunk to be identified (and retried) by its index.

use super::{Chunk, Fileset, SourceDescriptor};
use crate::source::SourceError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("chunk_size must be greater than zero")]
    InvalidChunkSize,

    #[error("Source {location} in dataset {dataset} unavailable: {reason}")]
    SourceUnavailable {
        dataset: String,
        location: String,
        reason: String,
    },
}

/// Configuration for chunk planning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    /// Maximum number of items per chunk
    pub chunk_size: u64,
    /// Stop after this many chunks (quick previews)
    pub max_chunks: Option<usize>,
    /// Abort planning on the first unavailable source
    pub fail_fast: bool,
}

impl PlanOptions {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            max_chunks: None,
            fail_fast: false,
        }
    }

    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = Some(max_chunks);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    fn cap_reached(&self, planned: usize) -> bool {
        self.max_chunks.is_some_and(|cap| planned >= cap)
    }
}

/// A source whose metadata could not be probed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableSource {
    pub dataset: String,
    pub location: String,
    pub reason: String,
}

/// Result of planning: the chunk sequence plus any sources left out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    pub unavailable: Vec<UnavailableSource>,
}

impl ChunkPlan {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total number of items covered by the planned chunks
    pub fn total_items(&self) -> u64 {
        self.chunks.iter().map(Chunk::len).sum()
    }
}

/// Pure: split `[0, length)` into consecutive ranges of at most `chunk_size`
///
/// Returns an empty list for zero-length sources or a zero chunk size.
pub fn partition(length: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    if chunk_size == 0 {
        return Vec::new();
    }

    let mut ranges = Vec::with_capacity(length.div_ceil(chunk_size) as usize);
    let mut start = 0;
    while start < length {
        let stop = start.saturating_add(chunk_size).min(length);
        ranges.push((start, stop));
        start = stop;
    }
    ranges
}

/// Plan the chunk sequence for a fileset
///
/// Datasets are visited in fileset order and sources in dataset order;
/// `probe` supplies each source's length. A probe failure is recorded as an
/// [`UnavailableSource`] and planning continues, unless `fail_fast` is set.
/// Once `max_chunks` chunks have been planned no further sources are probed.
pub fn plan_chunks<F>(
    fileset: &Fileset,
    options: &PlanOptions,
    mut probe: F,
) -> Result<ChunkPlan, PlanError>
where
    F: FnMut(&SourceDescriptor) -> Result<u64, SourceError>,
{
    if options.chunk_size == 0 {
        return Err(PlanError::InvalidChunkSize);
    }

    let mut plan = ChunkPlan::default();

    'datasets: for dataset in fileset.datasets() {
        for location in &dataset.files {
            if options.cap_reached(plan.chunks.len()) {
                break 'datasets;
            }

            let descriptor = SourceDescriptor::new(location.clone(), dataset.treename.clone());
            let length = match probe(&descriptor) {
                Ok(length) => length,
                Err(err) => {
                    if options.fail_fast {
                        return Err(PlanError::SourceUnavailable {
                            dataset: dataset.name.clone(),
                            location: location.clone(),
                            reason: err.to_string(),
                        });
                    }
                    warn!(
                        dataset = %dataset.name,
                        location = %location,
                        "Source unavailable, skipping: {}",
                        err
                    );
                    plan.unavailable.push(UnavailableSource {
                        dataset: dataset.name.clone(),
                        location: location.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let descriptor = descriptor.with_length(length);
            let ranges = partition(length, options.chunk_size);
            let chunks_in_source = ranges.len();
            debug!(
                "Source {} has {} items -> {} chunk(s)",
                location, length, chunks_in_source
            );

            for (chunk_in_source, (start, stop)) in ranges.into_iter().enumerate() {
                if options.cap_reached(plan.chunks.len()) {
                    break 'datasets;
                }
                plan.chunks.push(Chunk {
                    index: plan.chunks.len(),
                    dataset: dataset.name.clone(),
                    source: descriptor.clone(),
                    start,
                    stop,
                    chunk_in_source,
                    chunks_in_source,
                });
            }
        }
    }

    Ok(plan)
}

/// Memoized source lengths, keyed by location and tree name
///
/// Probing can require opening a remote file; a runner keeps one cache for
/// its lifetime so repeated runs over the same fileset probe each source once.
/// Failures are never cached.
#[derive(Debug, Default)]
pub struct LengthCache {
    entries: RwLock<HashMap<(String, Option<String>), u64>>,
}

impl LengthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &SourceDescriptor) -> Option<u64> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(source.location.clone(), source.treename.clone()))
            .copied()
    }

    pub fn insert(&self, source: &SourceDescriptor, length: u64) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert((source.location.clone(), source.treename.clone()), length);
    }

    /// Return the cached length, probing (and caching) on a miss
    pub fn get_or_probe<F>(&self, source: &SourceDescriptor, probe: F) -> Result<u64, SourceError>
    where
        F: FnOnce(&SourceDescriptor) -> Result<u64, SourceError>,
    {
        if let Some(length) = self.get(source) {
            return Ok(length);
        }
        let length = probe(source)?;
        self.insert(source, length);
        Ok(length)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
