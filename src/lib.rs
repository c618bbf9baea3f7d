//! # chunkflow
//!
//! Chunked, parallel, fault-tolerant map-reduce over collections of
//! sliceable data sources.
//!
//! A job takes a [`Fileset`](plan::Fileset) (named datasets, each an
//! ordered list of sources), splits every source into bounded chunks, runs
//! a user [`Processor`](processor::Processor) over each chunk on the chosen
//! executor and merges the per-chunk [`Accumulator`](accumulator::Accumulator)s
//! into one result in chunk-index order.
//!
//! ## Usage
//!
//! ```bash
//! chunkflow run --fileset files.yaml --executor pool -j 8 --column 2
//! chunkflow plan --fileset files.yaml --chunk-size 50000
//! ```
//!
//! ## Modules
//!
//! - `accumulator` - Mergeable result containers and ordered reduction
//! - `cli` - Argument parsing and the commands behind the binary
//! - `config` - Layered runner configuration
//! - `error` - Job-level error taxonomy
//! - `executor` - Sequential, pool and distributed executor backends
//! - `plan` - Filesets and chunk planning
//! - `processor` - Processing function interface and built-in processors
//! - `runner` - Job orchestration, reports, progress and cancellation
//! - `source` - Data source interface and the line-file source
//! - `testing` - Scriptable test doubles and fixtures
pub mod accumulator;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod plan;
pub mod processor;
pub mod runner;
pub mod source;

pub mod testing;

pub use accumulator::Accumulator;
pub use config::RunnerConfig;
pub use error::JobError;
pub use runner::{JobFailure, JobOutput, Runner};
