//! Chunk planning
//!
//! Turns a [`Fileset`] into an ordered sequence of [`Chunk`]s: bounded,
//! contiguous slices of one data source that form the unit of parallel work.

mod fileset;
mod planner;

pub use fileset::{Dataset, Fileset, FilesetError};
pub use planner::{
    partition, plan_chunks, ChunkPlan, LengthCache, PlanError, PlanOptions, UnavailableSource,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// One data source location, with its length once probed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Opaque location (path or URI) understood by the data source
    pub location: String,
    /// Optional tree/table name within the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treename: Option<String>,
    /// Total item count, filled in by planning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

impl SourceDescriptor {
    pub fn new(location: impl Into<String>, treename: Option<String>) -> Self {
        Self {
            location: location.into(),
            treename,
            length: None,
        }
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }
}

/// A bounded contiguous slice `[start, stop)` of one data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of this chunk in the planned sequence
    pub index: usize,
    /// Name of the dataset the source belongs to
    pub dataset: String,
    /// The source being sliced
    pub source: SourceDescriptor,
    /// First item offset (inclusive)
    pub start: u64,
    /// Last item offset (exclusive)
    pub stop: u64,
    /// Index of this chunk among the chunks of its source
    pub chunk_in_source: usize,
    /// Number of chunks the source was partitioned into
    pub chunks_in_source: usize,
}

impl Chunk {
    /// Number of items covered by this chunk
    pub fn len(&self) -> u64 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.stop == self.start
    }

    pub fn id(&self) -> ChunkId {
        ChunkId {
            index: self.index,
            dataset: self.dataset.clone(),
            location: self.source.location.clone(),
            start: self.start,
            stop: self.stop,
        }
    }
}

/// Stable identity of a chunk, used as the job report key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    pub index: usize,
    pub dataset: String,
    pub location: String,
    pub start: u64,
    pub stop: u64,
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}:{}[{}..{}]",
            self.index, self.dataset, self.location, self.start, self.stop
        )
    }
}
