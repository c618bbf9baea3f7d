//! Runner configuration
//!
//! Settings are layered: built-in defaults, then an optional config file
//! (see [`load_config`]), then `CHUNKFLOW_*` environment variables, then
//! whatever the caller (usually the CLI) overrides explicitly.

mod loader;

pub use loader::load_config;

use crate::accumulator::ReductionOrder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Prefix of every environment variable the configuration reads
pub const ENV_PREFIX: &str = "CHUNKFLOW_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("No scheduler client available for address {address}")]
    UnsupportedScheduler { address: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Everything a [`Runner`](crate::runner::Runner) needs to know about a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum items per chunk
    pub chunk_size: u64,
    /// Stop planning after this many chunks
    pub max_chunks: Option<usize>,
    /// Retries for transient chunk failures
    pub retries: u32,
    pub backoff: BackoffConfig,
    /// Per-attempt time limit
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub chunk_timeout: Option<Duration>,
    /// Chunk or source failures tolerated before the job aborts
    pub max_failures: usize,
    /// Abort planning at the first unavailable source
    pub fail_fast: bool,
    pub order: ReductionOrder,
    /// Return the partial accumulator when the job aborts
    pub best_effort: bool,
    /// How long in-flight chunks may finish after cancellation
    #[serde(with = "humantime_serde")]
    pub cancel_grace: Duration,
    pub executor: ExecutorConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100_000,
            max_chunks: None,
            retries: 0,
            backoff: BackoffConfig::default(),
            chunk_timeout: None,
            max_failures: 0,
            fail_fast: false,
            order: ReductionOrder::default(),
            best_effort: false,
            cancel_grace: Duration::from_secs(5),
            executor: ExecutorConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Apply `CHUNKFLOW_*` overrides from the process environment
    pub fn merge_env_vars(&mut self) -> Result<(), ConfigError> {
        self.merge_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn merge_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(value) = var("CHUNK_SIZE") {
            self.chunk_size = parse_env("CHUNK_SIZE", &value)?;
        }
        if let Some(value) = var("MAX_CHUNKS") {
            self.max_chunks = Some(parse_env("MAX_CHUNKS", &value)?);
        }
        if let Some(value) = var("RETRIES") {
            self.retries = parse_env("RETRIES", &value)?;
        }
        if let Some(value) = var("MAX_FAILURES") {
            self.max_failures = parse_env("MAX_FAILURES", &value)?;
        }
        if let Some(value) = var("WORKERS") {
            self.executor.set_workers(parse_env("WORKERS", &value)?);
        }

        Ok(())
    }

    /// Reject settings no job could run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::invalid("chunk_size", "must be greater than zero"));
        }
        if self.max_chunks == Some(0) {
            return Err(ConfigError::invalid("max_chunks", "must be greater than zero"));
        }
        self.backoff.validate()?;

        match &self.executor {
            ExecutorConfig::Sequential => {}
            ExecutorConfig::Pool { workers } => {
                if *workers == 0 {
                    return Err(ConfigError::invalid("executor.pool.workers", "must be at least 1"));
                }
            }
            ExecutorConfig::Distributed {
                scheduler_address,
                workers,
                compression,
            } => {
                if scheduler_address.trim().is_empty() {
                    return Err(ConfigError::invalid(
                        "executor.distributed.scheduler_address",
                        "must not be empty",
                    ));
                }
                if *workers == 0 {
                    return Err(ConfigError::invalid(
                        "executor.distributed.workers",
                        "must be at least 1",
                    ));
                }
                if let Some(level) = compression {
                    if *level > 9 {
                        return Err(ConfigError::invalid(
                            "executor.distributed.compression",
                            format!("level {} is outside 0-9", level),
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        ConfigError::invalid(&format!("{}{}", ENV_PREFIX, name), format!("{:?}: {}", value, e))
    })
}

/// Which executor backend runs the chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorConfig {
    /// One chunk at a time on the calling task
    #[default]
    Sequential,
    /// Local worker pool
    Pool {
        #[serde(default = "default_workers")]
        workers: usize,
    },
    /// Remote workers behind a scheduler
    Distributed {
        scheduler_address: String,
        #[serde(default = "default_workers")]
        workers: usize,
        /// Deflate level for task and result payloads
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compression: Option<u32>,
    },
}

impl ExecutorConfig {
    pub fn pool() -> Self {
        ExecutorConfig::Pool {
            workers: default_workers(),
        }
    }

    pub fn distributed(scheduler_address: impl Into<String>) -> Self {
        ExecutorConfig::Distributed {
            scheduler_address: scheduler_address.into(),
            workers: default_workers(),
            compression: None,
        }
    }

    /// Concurrency level; always 1 for the sequential backend
    pub fn workers(&self) -> usize {
        match self {
            ExecutorConfig::Sequential => 1,
            ExecutorConfig::Pool { workers } | ExecutorConfig::Distributed { workers, .. } => {
                *workers
            }
        }
    }

    /// Set the concurrency level; ignored by the sequential backend
    pub fn set_workers(&mut self, count: usize) {
        match self {
            ExecutorConfig::Sequential => {}
            ExecutorConfig::Pool { workers } | ExecutorConfig::Distributed { workers, .. } => {
                *workers = count
            }
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Delay growth between retries of one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed,
    /// Delay grows by `increment` per retry
    Linear {
        #[serde(with = "humantime_serde")]
        increment: Duration,
    },
    /// Delay multiplies by `base` per retry
    Exponential {
        #[serde(default = "default_exponential_base")]
        base: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base: default_exponential_base(),
        }
    }
}

fn default_exponential_base() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub strategy: BackoffStrategy,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub jitter: bool,
    /// Spread of the jitter as a fraction of the delay (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: false,
            jitter_factor: 0.3,
        }
    }
}

impl BackoffConfig {
    /// No waiting between retries
    pub fn immediate() -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid(
                "backoff.jitter_factor",
                "must be between 0.0 and 1.0",
            ));
        }
        if let BackoffStrategy::Exponential { base } = self.strategy {
            if !base.is_finite() || base < 1.0 {
                return Err(ConfigError::invalid("backoff.strategy.exponential.base", "must be >= 1.0"));
            }
        }
        Ok(())
    }
}
