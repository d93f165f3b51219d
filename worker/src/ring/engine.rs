//! Ring rotation multiply
//!
//! Every rank keeps its row band of A fixed while the column shards of B make
//! one full trip around the ring. In step `s` a rank multiplies its band by the
//! shard that originally belonged to rank `(rank - s) mod P`, fills the matching
//! `n/P` columns of its row band of C, then passes the shard to the right and
//! takes the next one from the left.
//!
//! There are `P` compute steps and `P - 1` exchanges: after the last compute
//! the shard is not sent anywhere.

use super::kernel::{multiply_shard, multiply_shard_parallel, BandShape};
use super::stats::RingStats;
use super::topology::Ring;
use crate::comm::{Communicator, Phase, RingMessage};
use crate::decomposition::{ColumnShard, Decomposition, RowBand};
use crate::errors::{MatmulError, Result};
use crate::matrix::Scalar;
use rayon::ThreadPool;
use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// What one compute step did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: usize,
    /// Rank whose original shard was multiplied
    pub origin: usize,
    /// Columns of C written
    pub columns: Range<usize>,
}

/// Result of a rank's pass through the ring
#[derive(Debug, Clone)]
pub struct EngineOutput<T> {
    /// This rank's finished row band of C
    pub c: RowBand<T>,
    /// One record per compute step, in order
    pub steps: Vec<StepRecord>,
    pub stats: RingStats,
}

/// Drives the rotation schedule for one rank.
pub struct RingEngine<'a, C: Communicator + ?Sized> {
    comm: &'a mut C,
    decomposition: Decomposition,
    job_id: Uuid,
    exchange_timeout: Option<Duration>,
    pool: Option<Arc<ThreadPool>>,
}

impl<'a, C: Communicator + ?Sized> RingEngine<'a, C> {
    /// # Errors
    /// Returns [`MatmulError::Config`] if the decomposition was built for a
    /// different rank or ring size than `comm` reports.
    pub fn new(comm: &'a mut C, decomposition: Decomposition, job_id: Uuid) -> Result<Self> {
        if comm.rank() != decomposition.rank() || comm.size() != decomposition.world_size() {
            return Err(MatmulError::Config(format!(
                "communicator is rank {} of {}, decomposition is for rank {} of {}",
                comm.rank(),
                comm.size(),
                decomposition.rank(),
                decomposition.world_size()
            )));
        }

        Ok(Self {
            comm,
            decomposition,
            job_id,
            exchange_timeout: None,
            pool: None,
        })
    }

    /// Fail an exchange that takes longer than `timeout`
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = Some(timeout);
        self
    }

    /// Run the local kernel on `pool` instead of the calling thread
    pub fn with_thread_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Multiply `a` by every shard of B in turn, starting from `shard`.
    pub async fn run<T: Scalar>(
        &mut self,
        a: &RowBand<T>,
        shard: ColumnShard<T>,
    ) -> Result<EngineOutput<T>> {
        let d = self.decomposition;
        let rank = d.rank();
        let p = d.world_size();
        let rpp = d.rows_per_process();

        if a.as_slice().len() != d.tile_len() || shard.as_slice().len() != d.tile_len() {
            return Err(MatmulError::Config(format!(
                "rank {} expected tiles of {} elements, got band {} and shard {}",
                rank,
                d.tile_len(),
                a.as_slice().len(),
                shard.as_slice().len()
            )));
        }

        info!(
            rank,
            world_size = p,
            n = d.n(),
            precision = %T::PRECISION,
            job_id = %self.job_id,
            "Starting ring multiply"
        );

        let mut c = RowBand::<T>::zeros(&d);
        let mut steps = Vec::with_capacity(p);
        let mut stats = RingStats::new();
        let mut shard = shard;

        for step in 0..p {
            let origin = Ring::origin(rank, step, p);
            let start_col = origin * rpp;
            let shape = BandShape {
                n: d.n(),
                width: rpp,
                start_col,
            };

            let started = Instant::now();
            match &self.pool {
                Some(pool) => multiply_shard_parallel(
                    pool,
                    a.as_slice(),
                    shard.as_slice(),
                    c.as_mut_slice(),
                    shape,
                ),
                None => multiply_shard(a.as_slice(), shard.as_slice(), c.as_mut_slice(), shape),
            }
            stats.record_compute(started.elapsed());

            debug!(rank, step, origin, start_col, "Computed column block");
            steps.push(StepRecord {
                step,
                origin,
                columns: start_col..start_col + rpp,
            });

            if step + 1 < p {
                shard = self.rotate(shard, step, &mut stats).await?;
            }
        }

        stats.log_summary(rank);
        Ok(EngineOutput { c, steps, stats })
    }

    /// Hand `shard` to the right neighbour and take the left neighbour's.
    async fn rotate<T: Scalar>(
        &mut self,
        shard: ColumnShard<T>,
        step: usize,
        stats: &mut RingStats,
    ) -> Result<ColumnShard<T>> {
        let d = self.decomposition;
        let p = d.world_size();
        let outgoing_origin = Ring::origin(d.rank(), step, p);
        let incoming_origin = Ring::origin(d.rank(), step + 1, p);

        let message = RingMessage::new(
            self.job_id,
            Phase::Rotation,
            step,
            outgoing_origin,
            T::into_payload(shard.into_vec()),
        );
        let bytes = message.size_bytes();

        let started = Instant::now();
        let exchange = self.comm.send_recv(message);
        let received = match self.exchange_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| MatmulError::Timeout {
                    step,
                    timeout_ms: limit.as_millis() as u64,
                })??,
            None => exchange.await?,
        };
        let elapsed = started.elapsed();

        received.check_schedule(self.job_id, Phase::Rotation, step, incoming_origin)?;
        let data = T::from_payload(received.payload)?;
        if data.len() != d.tile_len() {
            return Err(MatmulError::Protocol(format!(
                "shard from rank {} has {} elements, expected {}",
                incoming_origin,
                data.len(),
                d.tile_len()
            )));
        }

        stats.record_exchange(bytes, elapsed);
        debug!(
            rank = d.rank(),
            step,
            sent = outgoing_origin,
            received = incoming_origin,
            elapsed_us = elapsed.as_micros() as u64,
            "Rotated shard"
        );

        ColumnShard::from_vec(&d, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ChannelComm;
    use crate::decomposition::{split_column_shards, split_row_bands};
    use crate::matrix::DenseMatrix;

    async fn run_all(
        a: &DenseMatrix<f64>,
        b: &DenseMatrix<f64>,
        world_size: usize,
    ) -> Vec<EngineOutput<f64>> {
        let job_id = Uuid::new_v4();
        let bands = split_row_bands(a, world_size).unwrap();
        let shards = split_column_shards(b, world_size).unwrap();

        let mut handles = Vec::new();
        let ranks = ChannelComm::ring(world_size).into_iter().zip(bands).zip(shards);
        for ((comm, band), shard) in ranks {
            let n = a.size();
            handles.push(tokio::spawn(async move {
                let mut comm = comm;
                let d = Decomposition::new(n, world_size, comm.rank()).unwrap();
                let mut engine = RingEngine::new(&mut comm, d, job_id).unwrap();
                engine.run(&band, shard).await.unwrap()
            }));
        }

        let mut outputs = Vec::new();
        for handle in handles {
            outputs.push(handle.await.unwrap());
        }
        outputs
    }

    #[tokio::test]
    async fn test_every_column_block_computed_once() {
        let a = DenseMatrix::<f64>::identity(8);
        let outputs = run_all(&a, &a, 4).await;

        for (rank, output) in outputs.iter().enumerate() {
            let mut origins: Vec<usize> = output.steps.iter().map(|s| s.origin).collect();
            assert_eq!(origins[0], rank);
            origins.sort_unstable();
            assert_eq!(origins, vec![0, 1, 2, 3]);
            assert_eq!(output.stats.exchanges, 3);
            assert_eq!(output.stats.steps, 4);
        }
    }

    #[tokio::test]
    async fn test_product_matches_reference() {
        let a = DenseMatrix::<f64>::from_fn(6, |i, j| (i + 2 * j) as f64);
        let b = DenseMatrix::<f64>::from_fn(6, |i, j| (3 * i + j) as f64 - 4.0);
        let expected = a.matmul_reference(&b).unwrap();

        let outputs = run_all(&a, &b, 3).await;
        for (rank, output) in outputs.iter().enumerate() {
            for local in 0..2 {
                assert_eq!(output.c.row(local), expected.row(rank * 2 + local));
            }
        }
    }

    #[tokio::test]
    async fn test_single_rank_never_exchanges() {
        let a = DenseMatrix::<f64>::filled(4, 1.0);
        let outputs = run_all(&a, &a, 1).await;
        assert_eq!(outputs[0].stats.exchanges, 0);
        assert_eq!(outputs[0].steps.len(), 1);
        assert!(outputs[0].c.as_slice().iter().all(|&v| v == 4.0));
    }

    #[tokio::test]
    async fn test_decomposition_must_match_comm() {
        let mut comms = ChannelComm::ring(2);
        let d = Decomposition::new(4, 2, 1).unwrap();
        let result = RingEngine::new(&mut comms[0], d, Uuid::nil());
        assert!(matches!(result, Err(MatmulError::Config(_))));
    }

    #[tokio::test]
    async fn test_exchange_timeout() {
        let mut comms = ChannelComm::ring(2);
        let d = Decomposition::new(4, 2, 0).unwrap();
        let (band, shard) = d.generate::<f32>(&crate::matrix::MatrixInitializer::new(1));

        // rank 1 never takes part, so rank 0's first exchange stalls
        let mut engine = RingEngine::new(&mut comms[0], d, Uuid::nil())
            .unwrap()
            .with_exchange_timeout(Duration::from_millis(50));
        let err = engine.run(&band, shard).await.unwrap_err();
        assert!(matches!(err, MatmulError::Timeout { step: 0, .. }), "{}", err);
    }
}
