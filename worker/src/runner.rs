//! End-to-end runs: agreement, generation, the ring multiply, gather and
//! optional verification, for one rank or for a whole in-process ring.

use crate::agreement::agree_params;
use crate::assembly::gather_product;
use crate::comm::{ChannelComm, Communicator};
use crate::config::RunParams;
use crate::decomposition::{
    split_column_shards, split_row_bands, ColumnShard, Decomposition, RowBand,
};
use crate::errors::{MatmulError, Result};
use crate::matrix::{DenseMatrix, MatrixInitializer, Precision, Scalar};
use crate::ring::{RingEngine, RingStats, StepRecord};
use rayon::ThreadPool;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Per-rank execution settings that do not need agreement.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Kernel threads (1 runs the serial kernel)
    pub threads: usize,
    pub exchange_timeout: Option<Duration>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            exchange_timeout: None,
        }
    }
}

/// The assembled product in whichever precision the run used
#[derive(Debug, Clone, PartialEq)]
pub enum Product {
    F32(DenseMatrix<f32>),
    F64(DenseMatrix<f64>),
}

impl Product {
    pub fn size(&self) -> usize {
        match self {
            Product::F32(m) => m.size(),
            Product::F64(m) => m.size(),
        }
    }

    pub fn precision(&self) -> Precision {
        match self {
            Product::F32(_) => Precision::F32,
            Product::F64(_) => Precision::F64,
        }
    }
}

impl From<DenseMatrix<f32>> for Product {
    fn from(m: DenseMatrix<f32>) -> Self {
        Product::F32(m)
    }
}

impl From<DenseMatrix<f64>> for Product {
    fn from(m: DenseMatrix<f64>) -> Self {
        Product::F64(m)
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Product::F32(m) => write!(f, "{}", m),
            Product::F64(m) => write!(f, "{}", m),
        }
    }
}

/// Comparison against the sequential product
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verification {
    pub max_relative_error: f64,
    pub tolerance: f64,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.max_relative_error <= self.tolerance
    }
}

/// What one rank did in a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub rank: usize,
    pub world_size: usize,
    pub params: RunParams,
    /// Wall time of the ring multiply, excluding setup and gather
    pub elapsed: Duration,
    pub stats: RingStats,
    pub steps: Vec<StepRecord>,
    /// Assembled product, rank 0 only
    pub product: Option<Product>,
    /// Rank 0 only, when verification was requested
    pub verification: Option<Verification>,
}

/// A rank's result before it is tagged with a precision
struct RankOutcome<T> {
    elapsed: Duration,
    stats: RingStats,
    steps: Vec<StepRecord>,
    product: Option<DenseMatrix<T>>,
}

/// Run one rank from agreement through gather.
///
/// Rank 0 must be given `params`; the problem is checked against the ring
/// size before anything is sent.
pub async fn run_worker<C>(
    comm: &mut C,
    params: Option<RunParams>,
    options: &WorkerOptions,
) -> Result<RunReport>
where
    C: Communicator + ?Sized,
{
    if comm.rank() == 0 {
        if let Some(params) = &params {
            Decomposition::new(params.size, comm.size(), 0)?;
        }
    }

    let params = agree_params(comm, params).await?;
    let decomposition = Decomposition::new(params.size, comm.size(), comm.rank())?;

    match params.precision {
        Precision::F32 => run_typed::<C, f32>(comm, decomposition, params, options).await,
        Precision::F64 => run_typed::<C, f64>(comm, decomposition, params, options).await,
    }
}

async fn run_typed<C, T>(
    comm: &mut C,
    decomposition: Decomposition,
    params: RunParams,
    options: &WorkerOptions,
) -> Result<RunReport>
where
    C: Communicator + ?Sized,
    T: Scalar,
    DenseMatrix<T>: Into<Product>,
{
    let init = MatrixInitializer::new(params.seed);
    let (a, b) = decomposition.generate::<T>(&init);

    let outcome = multiply_and_gather(comm, decomposition, params.job_id, &a, b, options).await?;

    let verification = match (&outcome.product, params.verify) {
        (Some(product), true) => Some(verify_product(product, &init)?),
        _ => None,
    };

    Ok(RunReport {
        rank: decomposition.rank(),
        world_size: decomposition.world_size(),
        params,
        elapsed: outcome.elapsed,
        stats: outcome.stats,
        steps: outcome.steps,
        product: outcome.product.map(Into::into),
        verification,
    })
}

async fn multiply_and_gather<C, T>(
    comm: &mut C,
    decomposition: Decomposition,
    job_id: Uuid,
    a: &RowBand<T>,
    b: ColumnShard<T>,
    options: &WorkerOptions,
) -> Result<RankOutcome<T>>
where
    C: Communicator + ?Sized,
    T: Scalar,
{
    let pool = build_pool(decomposition.rank(), options.threads)?;

    let started = Instant::now();
    let output = {
        let mut engine = RingEngine::new(comm, decomposition, job_id)?;
        if let Some(timeout) = options.exchange_timeout {
            engine = engine.with_exchange_timeout(timeout);
        }
        if let Some(pool) = pool {
            engine = engine.with_thread_pool(pool);
        }
        engine.run(a, b).await?
    };
    let elapsed = started.elapsed();

    let product = gather_product(comm, &decomposition, job_id, output.c).await?;

    Ok(RankOutcome {
        elapsed,
        stats: output.stats,
        steps: output.steps,
        product,
    })
}

fn build_pool(rank: usize, threads: usize) -> Result<Option<Arc<ThreadPool>>> {
    if threads <= 1 {
        return Ok(None);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("ringmm-{}-{}", rank, i))
        .build()
        .map_err(|e| MatmulError::Execution(format!("Failed to build thread pool: {}", e)))?;
    Ok(Some(Arc::new(pool)))
}

fn verify_product<T: Scalar>(
    product: &DenseMatrix<T>,
    init: &MatrixInitializer,
) -> Result<Verification> {
    let n = product.size();
    let a: DenseMatrix<T> = init.matrix_a(n);
    let b: DenseMatrix<T> = init.matrix_b(n);
    let expected = a.matmul_reference(&b)?;

    let verification = Verification {
        max_relative_error: product.max_relative_error(&expected)?,
        tolerance: T::PRECISION.tolerance(),
    };

    if verification.passed() {
        info!(
            max_relative_error = verification.max_relative_error,
            "Product matches sequential reference"
        );
    } else {
        warn!(
            max_relative_error = verification.max_relative_error,
            tolerance = verification.tolerance,
            "Product differs from sequential reference"
        );
    }
    Ok(verification)
}

/// Run a whole ring as tokio tasks in this process.
///
/// Reports come back in rank order.
pub async fn run_local_cluster(
    params: RunParams,
    world_size: usize,
    options: WorkerOptions,
) -> Result<Vec<RunReport>> {
    Decomposition::new(params.size, world_size, 0)?;

    info!(
        job_id = %params.job_id,
        n = params.size,
        precision = %params.precision,
        world_size,
        "Starting in-process ring"
    );

    let mut handles = Vec::with_capacity(world_size);
    for mut comm in ChannelComm::ring(world_size) {
        let local = if comm.rank() == 0 { Some(params.clone()) } else { None };
        let options = options.clone();
        handles.push(tokio::spawn(async move {
            run_worker(&mut comm, local, &options).await
        }));
    }

    join_ranks(handles).await
}

/// Product of two fixed matrices computed by an in-process ring
#[derive(Debug, Clone)]
pub struct LocalProduct<T> {
    pub product: DenseMatrix<T>,
    /// Step records per rank
    pub steps: Vec<Vec<StepRecord>>,
    /// Statistics per rank
    pub stats: Vec<RingStats>,
}

/// Multiply caller-supplied matrices on an in-process ring, skipping
/// agreement and seeded generation.
pub async fn multiply_in_process<T: Scalar>(
    a: &DenseMatrix<T>,
    b: &DenseMatrix<T>,
    world_size: usize,
    options: WorkerOptions,
) -> Result<LocalProduct<T>> {
    if a.size() != b.size() {
        return Err(MatmulError::Config(format!(
            "cannot multiply {0}x{0} by {1}x{1}",
            a.size(),
            b.size()
        )));
    }

    let root = Decomposition::new(a.size(), world_size, 0)?;
    let bands = split_row_bands(a, world_size)?;
    let shards = split_column_shards(b, world_size)?;
    let job_id = Uuid::new_v4();

    let mut handles = Vec::with_capacity(world_size);
    let ranks = ChannelComm::ring(world_size).into_iter().zip(bands).zip(shards);
    for ((mut comm, band), shard) in ranks {
        let decomposition = root.for_rank(comm.rank())?;
        let options = options.clone();
        handles.push(tokio::spawn(async move {
            multiply_and_gather(&mut comm, decomposition, job_id, &band, shard, &options).await
        }));
    }

    let outcomes = join_ranks(handles).await?;

    let mut steps = Vec::with_capacity(world_size);
    let mut stats = Vec::with_capacity(world_size);
    let mut product = None;
    for outcome in outcomes {
        steps.push(outcome.steps);
        stats.push(outcome.stats);
        if outcome.product.is_some() {
            product = outcome.product;
        }
    }

    let product = product
        .ok_or_else(|| MatmulError::Execution("rank 0 returned no product".to_string()))?;
    Ok(LocalProduct {
        product,
        steps,
        stats,
    })
}

/// Wait for every rank, keeping the most telling failure.
///
/// When one rank fails its neighbours see closed links, so a
/// [`MatmulError::Communication`] is only reported if nothing else went wrong.
async fn join_ranks<R>(handles: Vec<tokio::task::JoinHandle<Result<R>>>) -> Result<Vec<R>> {
    let mut results = Vec::with_capacity(handles.len());
    let mut failure: Option<MatmulError> = None;

    for (rank, handle) in handles.into_iter().enumerate() {
        let err = match handle.await {
            Ok(Ok(result)) => {
                results.push(result);
                continue;
            }
            Ok(Err(e)) => e,
            Err(e) => MatmulError::Execution(format!("rank {} task failed: {}", rank, e)),
        };

        error!(rank, error = %err, "Rank failed");
        let replace = match &failure {
            None => true,
            Some(MatmulError::Communication(_)) => !matches!(err, MatmulError::Communication(_)),
            Some(_) => false,
        };
        if replace {
            failure = Some(err);
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(results),
    }
}
