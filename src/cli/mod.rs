//! Command implementations behind the `chunkflow` binary

pub mod args;

pub use args::{Cli, Commands, ExecutorKind, PlanArgs, RunArgs, DEFAULT_SCHEDULER};

use crate::accumulator::ReductionOrder;
use crate::config::{load_config, ExecutorConfig, RunnerConfig};
use crate::plan::Fileset;
use crate::processor::ColumnStatsProcessor;
use crate::runner::{BarProgress, LogProgress, ProgressObserver, Runner};
use crate::source::LineFileSource;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => run(args).await,
        Commands::Plan(args) => plan(args),
    }
}

/// Defaults, then config file, then environment, then flags
pub fn build_config(plan: &PlanArgs, run: Option<&RunArgs>) -> Result<RunnerConfig> {
    let mut config = match &plan.config {
        Some(path) => load_config(path)?,
        None => RunnerConfig::default(),
    };
    config.merge_env_vars()?;

    if let Some(chunk_size) = plan.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(max_chunks) = plan.max_chunks {
        config.max_chunks = Some(max_chunks);
    }
    if plan.fail_fast {
        config.fail_fast = true;
    }

    if let Some(args) = run {
        apply_run_args(&mut config, args);
    }

    config.validate()?;
    debug!("Effective config: {:?}", config);
    Ok(config)
}

fn apply_run_args(config: &mut RunnerConfig, args: &RunArgs) {
    if let Some(retries) = args.retries {
        config.retries = retries;
    }
    if let Some(max_failures) = args.max_failures {
        config.max_failures = max_failures;
    }
    if let Some(timeout) = args.timeout {
        config.chunk_timeout = Some(timeout);
    }
    if args.relaxed_order {
        config.order = ReductionOrder::Arrival;
    }
    if args.best_effort {
        config.best_effort = true;
    }

    match args.executor {
        Some(ExecutorKind::Sequential) => config.executor = ExecutorConfig::Sequential,
        Some(ExecutorKind::Pool) => {
            if !matches!(config.executor, ExecutorConfig::Pool { .. }) {
                config.executor = ExecutorConfig::pool();
            }
        }
        Some(ExecutorKind::Distributed) => {
            if !matches!(config.executor, ExecutorConfig::Distributed { .. }) {
                config.executor = ExecutorConfig::distributed(DEFAULT_SCHEDULER);
            }
        }
        None => {
            if args.scheduler.is_some()
                && !matches!(config.executor, ExecutorConfig::Distributed { .. })
            {
                config.executor = ExecutorConfig::distributed(DEFAULT_SCHEDULER);
            }
        }
    }
    match &mut config.executor {
        ExecutorConfig::Distributed {
            scheduler_address,
            compression,
            ..
        } => {
            if let Some(address) = &args.scheduler {
                *scheduler_address = address.clone();
            }
            if args.compression.is_some() {
                *compression = args.compression;
            }
        }
        _ => {
            if let Some(address) = &args.scheduler {
                warn!("Ignoring --scheduler {}: executor is not distributed", address);
            }
        }
    }
    if let Some(workers) = args.workers {
        config.executor.set_workers(workers);
    }
}

fn load_fileset(path: &Path) -> Result<(Fileset, LineFileSource)> {
    let fileset = Fileset::from_path(path)
        .with_context(|| format!("Failed to load fileset {}", path.display()))?;
    let root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((fileset, LineFileSource::with_root(root)))
}

fn plan(args: PlanArgs) -> Result<()> {
    let config = build_config(&args, None)?;
    let (fileset, source) = load_fileset(&args.fileset)?;
    let runner = Runner::new(config)?;

    let plan = runner.plan(&fileset, &source)?;
    for chunk in &plan.chunks {
        println!("{}", chunk.id());
    }
    for unavailable in &plan.unavailable {
        eprintln!(
            "unavailable: {}:{} ({})",
            unavailable.dataset, unavailable.location, unavailable.reason
        );
    }
    println!(
        "{} chunk(s), {} item(s), {} unavailable source(s)",
        plan.len(),
        plan.total_items(),
        plan.unavailable.len()
    );
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let config = build_config(&args.plan, Some(&args))?;
    let (fileset, source) = load_fileset(&args.plan.fileset)?;

    let mut processor = ColumnStatsProcessor::new(args.column);
    if let Some(delimiter) = args.delimiter {
        processor = processor.with_delimiter(delimiter);
    }
    if let (Some(bins), Some((lo, hi))) = (args.bins, args.range) {
        processor = processor.with_histogram(bins, lo, hi);
    }

    let progress: Arc<dyn ProgressObserver> = if args.progress {
        Arc::new(BarProgress::new())
    } else {
        Arc::new(LogProgress::default())
    };
    let runner = Runner::new(config)?.with_progress(progress);
    let interrupt = runner.cancellation().listen_for_ctrl_c();

    let result = runner
        .run(&fileset, Arc::new(source), Arc::new(processor))
        .await;
    interrupt.abort();

    match result {
        Ok(output) => {
            if let Some(path) = &args.report {
                write_json(path, &output.report)?;
            }
            write_output(args.output.as_deref(), &output.accumulator)?;
            info!(
                "Processed {} item(s) in {} chunk(s) ({:.0} items/s)",
                output.metrics.items_processed,
                output.metrics.chunks_succeeded,
                output.metrics.throughput()
            );
            Ok(())
        }
        Err(failure) => {
            if let Some(path) = &args.report {
                write_json(path, &failure.report)?;
            }
            if let Some(partial) = &failure.partial {
                warn!("Writing partial result");
                write_output(args.output.as_deref(), partial)?;
            }
            let job_id = failure.report.job_id;
            Err(anyhow::Error::new(failure.error).context(format!("Job {} aborted", job_id)))
        }
    }
}

fn write_output<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    match path {
        Some(path) => write_json(path, value),
        None => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(())
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
