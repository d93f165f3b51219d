//! Ring Matrix Multiply - Command Line Interface
//!
//! ## Commands
//! - `local` - Run a whole ring of workers inside this process
//! - `worker` - Run one rank of a TCP ring (start one process per peer)
//! - `generate-config` - Write a default configuration file
//!
//! Options given on the command line override the configuration file
//! (`~/.ringmm/config.toml` unless `--config` is passed).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ring_matmul::config::expand_path;
use ring_matmul::{
    init_production_logging, init_simple_logging, run_local_cluster, run_worker, Precision,
    RunConfig, RunReport, TcpComm, WorkerOptions,
};
use std::path::PathBuf;
use tracing::{error, info};

/// Ring-based distributed dense matrix multiply
#[derive(Parser, Debug)]
#[command(name = "ringmm")]
#[command(about = "Ring-based distributed dense matrix multiply", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every rank of the ring in this process
    Local {
        #[command(flatten)]
        problem: ProblemArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Number of ranks in the ring
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Run one rank of a TCP ring
    Worker {
        /// This worker's rank (index into --peers)
        #[arg(short, long)]
        rank: usize,

        /// Listen addresses of all ranks in rank order (host:port,host:port,...)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// Problem options; only rank 0's values are used
        #[command(flatten)]
        problem: ProblemArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Write a default configuration file
    GenerateConfig {
        /// Output path (defaults to ~/.ringmm/config.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct ProblemArgs {
    /// Matrix size n (A, B and C are n x n)
    #[arg(short = 'n', long = "size")]
    size: Option<usize>,

    /// Element precision (f32 or f64)
    #[arg(short, long)]
    precision: Option<Precision>,

    /// Seed for the input matrices
    #[arg(short, long)]
    seed: Option<u64>,

    /// Check the product against a sequential multiply on rank 0
    #[arg(long)]
    verify: bool,
}

impl ProblemArgs {
    fn any_set(&self) -> bool {
        self.size.is_some() || self.precision.is_some() || self.seed.is_some() || self.verify
    }

    fn apply(&self, config: &mut RunConfig) {
        if let Some(size) = self.size {
            config.problem.size = size;
        }
        if let Some(precision) = self.precision {
            config.problem.precision = precision;
        }
        if let Some(seed) = self.seed {
            config.problem.seed = seed;
        }
        if self.verify {
            config.problem.verify = true;
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Kernel threads per rank
    #[arg(short, long)]
    threads: Option<usize>,

    /// Fail an exchange that takes longer than this (0 disables)
    #[arg(long)]
    exchange_timeout_ms: Option<u64>,

    /// Print the product when n is below this
    #[arg(long)]
    print_threshold: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Also write logs to a daily rolling file
    #[arg(long)]
    log_to_file: bool,
}

impl RunArgs {
    fn load_config(&self) -> Result<RunConfig> {
        let mut config = RunConfig::load_or_default(self.config.as_deref())
            .context("Failed to load configuration")?;

        if let Some(threads) = self.threads {
            config.cluster.threads = threads;
        }
        if let Some(timeout) = self.exchange_timeout_ms {
            config.cluster.exchange_timeout_ms = timeout;
        }
        if let Some(threshold) = self.print_threshold {
            config.output.print_threshold = threshold;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.log_to_file {
            config.logging.log_to_file = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Local {
            problem,
            run,
            workers,
        } => {
            let mut config = run.load_config()?;
            problem.apply(&mut config);
            if let Some(workers) = workers {
                config.cluster.workers = workers;
            }
            config.validate().context("Invalid configuration")?;
            init_logging(&config)?;
            cmd_local(config).await?;
        }

        Commands::Worker {
            rank,
            peers,
            problem,
            run,
        } => {
            let mut config = run.load_config()?;
            problem.apply(&mut config);
            if !peers.is_empty() {
                config.transport.peers = peers;
            }
            config.validate().context("Invalid configuration")?;
            init_logging(&config)?;
            cmd_worker(config, rank, problem.any_set()).await?;
        }

        Commands::GenerateConfig { output, force } => {
            init_simple_logging("info")?;
            cmd_generate_config(output, force)?;
        }
    }

    Ok(())
}

fn init_logging(config: &RunConfig) -> Result<()> {
    if config.logging.log_to_file {
        init_production_logging(&config.logging.level, Some(config.log_dir()))
    } else {
        init_simple_logging(&config.logging.level)
    }
}

fn worker_options(config: &RunConfig) -> WorkerOptions {
    WorkerOptions {
        threads: config.cluster.threads,
        exchange_timeout: config.exchange_timeout(),
    }
}

/// Run the whole ring in-process
async fn cmd_local(config: RunConfig) -> Result<()> {
    let params = config.run_params();
    let workers = config.cluster.workers;

    print_header(&config, workers);

    let reports = run_local_cluster(params, workers, worker_options(&config))
        .await
        .context("Ring multiply failed")?;

    let root = reports
        .first()
        .context("In-process ring returned no reports")?;
    print_report(root, config.output.print_threshold)
}

/// Run a single rank over TCP
async fn cmd_worker(config: RunConfig, rank: usize, problem_given: bool) -> Result<()> {
    let peers = config.peer_addrs()?;
    if peers.is_empty() {
        anyhow::bail!("No peers configured: pass --peers or set [transport] peers");
    }

    if rank == 0 {
        print_header(&config, peers.len());
    }

    info!(rank, peers = peers.len(), "Joining TCP ring");
    let mut comm = TcpComm::connect(rank, &peers, config.tcp_options())
        .await
        .with_context(|| format!("Rank {} failed to join the ring", rank))?;

    let local = if rank == 0 || problem_given {
        Some(config.run_params())
    } else {
        None
    };

    let report = run_worker(&mut comm, local, &worker_options(&config))
        .await
        .map_err(|e| {
            error!(rank, error = %e, "Worker failed");
            e
        })
        .context("Ring multiply failed")?;

    if rank == 0 {
        print_report(&report, config.output.print_threshold)?;
    } else {
        info!(
            rank,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Worker finished"
        );
    }
    Ok(())
}

/// Write a default configuration file
fn cmd_generate_config(output: Option<PathBuf>, force: bool) -> Result<()> {
    use colored::Colorize;

    let path = match output {
        Some(path) => expand_path(&path),
        None => RunConfig::default_path()?,
    };

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    RunConfig::default()
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{} {}", "Wrote configuration to".green(), path.display());
    Ok(())
}

fn print_header(config: &RunConfig, workers: usize) {
    use colored::Colorize;

    println!(
        "{} {} {} {} {} {}",
        "Matrix size:".bold(),
        config.problem.size,
        "Precision:".bold(),
        config.problem.precision,
        "Workers:".bold(),
        workers
    );
}

/// Print rank 0's results
fn print_report(report: &RunReport, print_threshold: usize) -> Result<()> {
    use colored::Colorize;

    println!(
        "Matrix multiplication time: {:.6} seconds",
        report.elapsed.as_secs_f64()
    );
    println!(
        "  Exchanges: {}  Bytes sent: {}  Exchange share: {:.1}%",
        report.stats.exchanges,
        report.stats.bytes_sent,
        report.stats.exchange_ratio() * 100.0
    );

    if let Some(product) = &report.product {
        if product.size() < print_threshold {
            println!("\n{}", "Matrix final result".bold());
            print!("{}", product);
        }
    }

    if let Some(verification) = &report.verification {
        if verification.passed() {
            println!(
                "\n{} max relative error {:e} (tolerance {:e})",
                "Verification passed:".green().bold(),
                verification.max_relative_error,
                verification.tolerance
            );
        } else {
            println!(
                "\n{} max relative error {:e} exceeds tolerance {:e}",
                "Verification failed:".red().bold(),
                verification.max_relative_error,
                verification.tolerance
            );
            anyhow::bail!("Distributed product does not match the sequential reference");
        }
    }

    Ok(())
}
