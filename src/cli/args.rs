//! CLI argument structures

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Scheduler used when the distributed executor is chosen without an address
pub const DEFAULT_SCHEDULER: &str = "inproc://local";

/// Chunked, parallel, fault-tolerant map-reduce over line files
#[derive(Parser, Debug)]
#[command(name = "chunkflow")]
#[command(about = "chunkflow - chunked map-reduce over sliceable data sources", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job and write the final accumulator
    Run(RunArgs),

    /// Print the chunk plan without running anything
    Plan(PlanArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// Fileset file (YAML or JSON) mapping dataset names to files
    #[arg(short, long)]
    pub fileset: PathBuf,

    /// Runner config file (.toml, .yaml or .json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum items per chunk
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Stop after this many chunks
    #[arg(long)]
    pub max_chunks: Option<usize>,

    /// Abort at the first unavailable source
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    Sequential,
    Pool,
    Distributed,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// Retries for transient chunk failures
    #[arg(long)]
    pub retries: Option<u32>,

    /// Executor backend
    #[arg(short, long, value_enum)]
    pub executor: Option<ExecutorKind>,

    /// Worker count for pool and distributed executors
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Scheduler address for the distributed executor (implies it when
    /// no executor is chosen; default: inproc://local)
    #[arg(long)]
    pub scheduler: Option<String>,

    /// Deflate level (0-9) for distributed payloads
    #[arg(long)]
    pub compression: Option<u32>,

    /// Per-chunk time limit (e.g. "30s", "2m")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Chunk or source failures to tolerate before aborting
    #[arg(long)]
    pub max_failures: Option<usize>,

    /// Merge results in arrival order instead of chunk order
    #[arg(long)]
    pub relaxed_order: bool,

    /// Write the partial result when the job aborts
    #[arg(long)]
    pub best_effort: bool,

    /// Zero-based column holding the value
    #[arg(long, default_value = "0")]
    pub column: usize,

    /// Column delimiter (default: whitespace)
    #[arg(long)]
    pub delimiter: Option<char>,

    /// Histogram bin count
    #[arg(long, requires = "range")]
    pub bins: Option<usize>,

    /// Histogram range as LO:HI
    #[arg(long, value_parser = parse_range, requires = "bins")]
    pub range: Option<(f64, f64)>,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,

    /// Write the result here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the job report (JSON) here
    #[arg(long)]
    pub report: Option<PathBuf>,
}

fn parse_range(value: &str) -> Result<(f64, f64), String> {
    let (lo, hi) = value
        .split_once(':')
        .ok_or_else(|| format!("expected LO:HI, got {:?}", value))?;
    let lo: f64 = lo.trim().parse().map_err(|e| format!("bad lower bound: {}", e))?;
    let hi: f64 = hi.trim().parse().map_err(|e| format!("bad upper bound: {}", e))?;
    if !lo.is_finite() || !hi.is_finite() || lo >= hi {
        return Err(format!("lower bound {} must be below upper bound {}", lo, hi));
    }
    Ok((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("0:10").unwrap(), (0.0, 10.0));
        assert_eq!(parse_range("-1.5 : 2").unwrap(), (-1.5, 2.0));
        assert!(parse_range("5:1").is_err());
        assert!(parse_range("5").is_err());
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "chunkflow",
            "-vv",
            "run",
            "--fileset",
            "files.yaml",
            "--executor",
            "pool",
            "-j",
            "3",
            "--timeout",
            "2s",
            "--bins",
            "10",
            "--range",
            "0:100",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.plan.fileset, PathBuf::from("files.yaml"));
        assert_eq!(args.executor, Some(ExecutorKind::Pool));
        assert_eq!(args.workers, Some(3));
        assert_eq!(args.timeout, Some(Duration::from_secs(2)));
        assert_eq!(args.range, Some((0.0, 100.0)));
    }

    #[test]
    fn test_bins_require_range() {
        assert!(Cli::try_parse_from(["chunkflow", "run", "-f", "x.yaml", "--bins", "4"]).is_err());
    }
}
