//! Splitting the global problem into per-rank tiles.
//!
//! ```text
//!      A                 B                 C
//!  a a a a a a     b b|b b|b b       c c . . . .
//!  a a a a a a     b b|b b|b b       c c . . . .   rank 0
//!  -----------        |   |          -----------
//!  a a a a a a     b b|b b|b b       . . c c . .
//!  a a a a a a     b b|b b|b b       . . c c . .   rank 1
//!  -----------        |   |          -----------
//!  a a a a a a     b b|b b|b b       . . . . c c
//!  a a a a a a     b b|b b|b b       . . . . c c   rank 2
//! ```
//!
//! Rank `r` owns rows `[r·w, (r+1)·w)` of A and C for the whole run and starts
//! out holding columns `[r·w, (r+1)·w)` of B, where `w = n / P`. The C cells
//! marked above are the ones computed in step 0; later steps fill the rest of
//! each row band as shards rotate.

use crate::errors::{MatmulError, Result};
use crate::matrix::{DenseMatrix, MatrixInitializer, Scalar};
use std::ops::Range;

/// Extents of one rank's tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decomposition {
    n: usize,
    world_size: usize,
    rank: usize,
    rows_per_process: usize,
}

impl Decomposition {
    /// # Errors
    /// Returns [`MatmulError::Config`] if `n` is zero, there are no ranks, `rank`
    /// is outside the ring, or `n` is not divisible by `world_size`.
    pub fn new(n: usize, world_size: usize, rank: usize) -> Result<Self> {
        if n == 0 {
            return Err(MatmulError::Config("matrix size must be positive".to_string()));
        }
        if world_size == 0 {
            return Err(MatmulError::Config(
                "at least one worker is required".to_string(),
            ));
        }
        if rank >= world_size {
            return Err(MatmulError::Config(format!(
                "rank {} is outside a ring of {} workers",
                rank, world_size
            )));
        }
        if n % world_size != 0 {
            return Err(MatmulError::Config(format!(
                "matrix size {} is not divisible by {} workers",
                n, world_size
            )));
        }

        Ok(Self {
            n,
            world_size,
            rank,
            rows_per_process: n / world_size,
        })
    }

    /// The same problem seen from another rank.
    pub fn for_rank(&self, rank: usize) -> Result<Self> {
        Self::new(self.n, self.world_size, rank)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Rows per band, which is also columns per shard
    pub fn rows_per_process(&self) -> usize {
        self.rows_per_process
    }

    /// Global index range of band `index` (rows of A/C or columns of B).
    pub fn band_range(&self, index: usize) -> Range<usize> {
        let start = index * self.rows_per_process;
        start..start + self.rows_per_process
    }

    /// Rows of A and C this rank owns
    pub fn row_range(&self) -> Range<usize> {
        self.band_range(self.rank)
    }

    /// Columns of B in this rank's shard before any rotation
    pub fn initial_col_range(&self) -> Range<usize> {
        self.band_range(self.rank)
    }

    /// Elements in a row band, equal to the elements in a column shard
    pub fn tile_len(&self) -> usize {
        self.rows_per_process * self.n
    }

    /// Fill this rank's inputs from a seeded initializer.
    pub fn generate<T: Scalar>(&self, init: &MatrixInitializer) -> (RowBand<T>, ColumnShard<T>) {
        let a = RowBand {
            data: init.row_band(self.row_range(), self.n),
            rows: self.rows_per_process,
            n: self.n,
            first_row: self.row_range().start,
        };
        let b = ColumnShard {
            data: init.column_shard(self.initial_col_range(), self.n),
            width: self.rows_per_process,
        };
        (a, b)
    }
}

/// A rank's exclusive slice of rows, row-major with stride `n`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBand<T> {
    data: Vec<T>,
    rows: usize,
    n: usize,
    first_row: usize,
}

impl<T: Scalar> RowBand<T> {
    /// Zeroed band sized for `decomposition`'s rank
    pub fn zeros(decomposition: &Decomposition) -> Self {
        Self {
            data: vec![T::ZERO; decomposition.tile_len()],
            rows: decomposition.rows_per_process(),
            n: decomposition.n(),
            first_row: decomposition.row_range().start,
        }
    }

    pub fn from_vec(decomposition: &Decomposition, data: Vec<T>) -> Result<Self> {
        if data.len() != decomposition.tile_len() {
            return Err(MatmulError::Config(format!(
                "row band needs {} elements, got {}",
                decomposition.tile_len(),
                data.len()
            )));
        }
        Ok(Self {
            data,
            rows: decomposition.rows_per_process(),
            n: decomposition.n(),
            first_row: decomposition.row_range().start,
        })
    }

    /// Number of local rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Global index of the first local row
    pub fn first_row(&self) -> usize {
        self.first_row
    }

    /// Local row `i`
    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

/// `n × width` block of B, row-major with stride `width`.
///
/// Which original columns the block holds is not stored: it follows from the
/// holder's rank and the step (see [`crate::ring::Ring::origin`]).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnShard<T> {
    data: Vec<T>,
    width: usize,
}

impl<T: Scalar> ColumnShard<T> {
    pub fn from_vec(decomposition: &Decomposition, data: Vec<T>) -> Result<Self> {
        if data.len() != decomposition.tile_len() {
            return Err(MatmulError::Config(format!(
                "column shard needs {} elements, got {}",
                decomposition.tile_len(),
                data.len()
            )));
        }
        Ok(Self {
            data,
            width: decomposition.rows_per_process(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Element at global row `k`, shard column `jj`
    #[inline]
    pub fn get(&self, k: usize, jj: usize) -> T {
        self.data[k * self.width + jj]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

/// Cut `m` into one row band per rank.
pub fn split_row_bands<T: Scalar>(
    m: &DenseMatrix<T>,
    world_size: usize,
) -> Result<Vec<RowBand<T>>> {
    let root = Decomposition::new(m.size(), world_size, 0)?;
    (0..world_size)
        .map(|rank| {
            let d = root.for_rank(rank)?;
            let range = d.row_range();
            let data = m.as_slice()[range.start * d.n()..range.end * d.n()].to_vec();
            RowBand::from_vec(&d, data)
        })
        .collect()
}

/// Cut `m` into one column shard per rank.
pub fn split_column_shards<T: Scalar>(
    m: &DenseMatrix<T>,
    world_size: usize,
) -> Result<Vec<ColumnShard<T>>> {
    let root = Decomposition::new(m.size(), world_size, 0)?;
    (0..world_size)
        .map(|rank| {
            let d = root.for_rank(rank)?;
            let cols = d.initial_col_range();
            let mut data = Vec::with_capacity(d.tile_len());
            for k in 0..d.n() {
                data.extend_from_slice(&m.row(k)[cols.clone()]);
            }
            ColumnShard::from_vec(&d, data)
        })
        .collect()
}
