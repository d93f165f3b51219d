//! Deterministic matrix initialization.
//!
//! Every row of A and every column of B has its own RNG stream derived from the
//! run seed, so a rank can fill exactly its own row band or column shard without
//! seeing the rest of the matrix, and rank 0 can regenerate the full inputs to
//! verify the product.

use super::{DenseMatrix, Scalar};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;

/// Resolution of generated values: 24 bits fit exactly in an f32 mantissa, so
/// both precisions multiply the same inputs.
const VALUE_BITS: u32 = 24;

/// Which input operand a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    A,
    B,
}

impl Operand {
    fn tag(self) -> u64 {
        match self {
            Operand::A => 0xA11C_E5EE_D000_000A,
            Operand::B => 0xB0B5_EED0_0000_000B,
        }
    }
}

/// Seeded uniform `[0, 1)` filler for A and B.
#[derive(Debug, Clone, Copy)]
pub struct MatrixInitializer {
    seed: u64,
}

impl MatrixInitializer {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn stream(&self, operand: Operand, index: usize) -> StdRng {
        // splitmix64 finalizer over (seed, operand, index)
        let mut z = self
            .seed
            .wrapping_add(operand.tag())
            .wrapping_add((index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        StdRng::seed_from_u64(z ^ (z >> 31))
    }

    fn sample<T: Scalar>(rng: &mut StdRng) -> T {
        let bits = rng.gen_range(0..1u32 << VALUE_BITS);
        T::from_f64(bits as f64 / (1u64 << VALUE_BITS) as f64)
    }

    /// Rows `rows` of A, row-major with stride `n`.
    pub fn row_band<T: Scalar>(&self, rows: Range<usize>, n: usize) -> Vec<T> {
        let mut data = Vec::with_capacity(rows.len() * n);
        for i in rows {
            let mut rng = self.stream(Operand::A, i);
            data.extend((0..n).map(|_| Self::sample::<T>(&mut rng)));
        }
        data
    }

    /// Columns `cols` of B across all `n` rows, row-major with stride `cols.len()`.
    pub fn column_shard<T: Scalar>(&self, cols: Range<usize>, n: usize) -> Vec<T> {
        let width = cols.len();
        let mut data = vec![T::ZERO; n * width];
        for (jj, j) in cols.enumerate() {
            let mut rng = self.stream(Operand::B, j);
            for k in 0..n {
                data[k * width + jj] = Self::sample(&mut rng);
            }
        }
        data
    }

    /// The full A this seed describes.
    pub fn matrix_a<T: Scalar>(&self, n: usize) -> DenseMatrix<T> {
        DenseMatrix::from_raw(self.row_band(0..n, n), n)
    }

    /// The full B this seed describes.
    pub fn matrix_b<T: Scalar>(&self, n: usize) -> DenseMatrix<T> {
        // a shard spanning every column is the whole matrix, row-major
        DenseMatrix::from_raw(self.column_shard(0..n, n), n)
    }
}
