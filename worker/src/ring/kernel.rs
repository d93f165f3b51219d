//! Local multiply of a row band against one column shard.
//!
//! For each local row `i` and shard column `jj` the kernel writes
//! `c[i][start_col + jj] = Σ_k a[i][k] · shard[k][jj]`, reducing `k` in
//! increasing order. The parallel variant splits work by output row only, so
//! every cell is still one sequential reduction and both variants produce
//! bit-identical results.

use crate::matrix::Scalar;
use rayon::prelude::*;
use rayon::ThreadPool;

/// Shape of one local compute pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandShape {
    /// Global matrix dimension (row stride of A and C, depth of the reduction)
    pub n: usize,
    /// Columns in the shard (row stride of the shard)
    pub width: usize,
    /// First global column of C this shard produces
    pub start_col: usize,
}

#[inline]
fn multiply_row<T: Scalar>(a_row: &[T], shard: &[T], c_row: &mut [T], shape: BandShape) {
    let BandShape {
        width, start_col, ..
    } = shape;

    for (jj, out) in c_row[start_col..start_col + width].iter_mut().enumerate() {
        let mut sum = T::ZERO;
        for (k, &a) in a_row.iter().enumerate() {
            sum += a * shard[k * width + jj];
        }
        *out = sum;
    }
}

/// Serial kernel
pub fn multiply_shard<T: Scalar>(a: &[T], shard: &[T], c: &mut [T], shape: BandShape) {
    for (a_row, c_row) in a.chunks_exact(shape.n).zip(c.chunks_exact_mut(shape.n)) {
        multiply_row(a_row, shard, c_row, shape);
    }
}

/// Row-parallel kernel running on `pool`
pub fn multiply_shard_parallel<T: Scalar>(
    pool: &ThreadPool,
    a: &[T],
    shard: &[T],
    c: &mut [T],
    shape: BandShape,
) {
    pool.install(|| {
        a.par_chunks_exact(shape.n)
            .zip(c.par_chunks_exact_mut(shape.n))
            .for_each(|(a_row, c_row)| multiply_row(a_row, shard, c_row, shape));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixInitializer;

    #[test]
    fn test_writes_only_its_band() {
        // 2 local rows of a 4-wide problem, shard covers columns 2..4
        let a = vec![1.0f32; 8];
        let shard = vec![1.0f32; 8];
        let mut c = vec![-1.0f32; 8];

        multiply_shard(&a, &shard, &mut c, BandShape { n: 4, width: 2, start_col: 2 });

        assert_eq!(c, vec![-1.0, -1.0, 4.0, 4.0, -1.0, -1.0, 4.0, 4.0]);
    }

    #[test]
    fn test_known_values() {
        // a = [1 2 3], shard = column [4 5 6]^T
        let a = vec![1.0f64, 2.0, 3.0];
        let shard = vec![4.0f64, 5.0, 6.0];
        let mut c = vec![0.0f64; 3];

        multiply_shard(&a, &shard, &mut c, BandShape { n: 3, width: 1, start_col: 1 });

        assert_eq!(c, vec![0.0, 32.0, 0.0]);
    }

    #[test]
    fn test_parallel_matches_serial_bitwise() {
        let init = MatrixInitializer::new(11);
        let n = 24;
        let width = 6;
        let a: Vec<f32> = init.row_band(0..width, n);
        let shard: Vec<f32> = init.column_shard(6..12, n);
        let shape = BandShape { n, width, start_col: 6 };

        let mut serial = vec![0.0f32; width * n];
        multiply_shard(&a, &shard, &mut serial, shape);

        let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();
        let mut parallel = vec![0.0f32; width * n];
        multiply_shard_parallel(&pool, &a, &shard, &mut parallel, shape);

        assert_eq!(serial, parallel);
    }
}
