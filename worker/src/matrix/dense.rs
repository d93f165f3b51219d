//! Square row-major matrix used for whole-matrix views.
//!
//! Only rank 0 ever holds one of these during a distributed run (assembly and
//! verification); the ring itself works on row bands and column shards.

use super::Scalar;
use crate::errors::{MatmulError, Result};
use std::fmt;

/// Dense n×n matrix stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix<T> {
    /// Row-major data storage
    data: Vec<T>,
    /// Number of rows (and columns)
    n: usize,
}

impl<T: Scalar> DenseMatrix<T> {
    /// Create a matrix from row-major data.
    pub fn new(data: Vec<T>, n: usize) -> Result<Self> {
        if data.len() != n * n {
            return Err(MatmulError::Config(format!(
                "Data length {} doesn't match shape {}x{}={}",
                data.len(),
                n,
                n,
                n * n
            )));
        }
        Ok(Self { data, n })
    }

    /// Wrap data whose length is already known to be `n * n`.
    pub(crate) fn from_raw(data: Vec<T>, n: usize) -> Self {
        debug_assert_eq!(data.len(), n * n);
        Self { data, n }
    }

    /// Create a matrix filled with zeros
    pub fn zeros(n: usize) -> Self {
        Self::filled(n, T::ZERO)
    }

    /// Create a matrix filled with a constant value
    pub fn filled(n: usize, value: T) -> Self {
        Self {
            data: vec![value; n * n],
            n,
        }
    }

    pub fn identity(n: usize) -> Self {
        Self::from_fn(n, |i, j| if i == j { T::ONE } else { T::ZERO })
    }

    /// Build a matrix by evaluating `f(row, col)` for every cell.
    pub fn from_fn(n: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                data.push(f(i, j));
            }
        }
        Self { data, n }
    }

    /// Matrix dimension
    pub fn size(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.n + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.data[row * self.n + col] = value;
    }

    /// Get a row as a slice
    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.n;
        &self.data[start..start + self.n]
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

    /// Single-process product `self · other` with the plain i-j-k loop.
    ///
    /// Each cell is reduced over `k = 0..n` in increasing order, the same order
    /// the ring kernel uses, so small integer-valued inputs agree exactly.
    pub fn matmul_reference(&self, other: &DenseMatrix<T>) -> Result<DenseMatrix<T>> {
        if self.n != other.n {
            return Err(MatmulError::Config(format!(
                "Shape mismatch for matmul: {}x{} vs {}x{}",
                self.n, self.n, other.n, other.n
            )));
        }

        let n = self.n;
        let mut out = Self::zeros(n);
        for i in 0..n {
            for j in 0..n {
                let mut sum = T::ZERO;
                for k in 0..n {
                    sum += self.data[i * n + k] * other.data[k * n + j];
                }
                out.data[i * n + j] = sum;
            }
        }
        Ok(out)
    }

    /// Largest `|self - expected| / max(|expected|, 1)` over all cells.
    pub fn max_relative_error(&self, expected: &DenseMatrix<T>) -> Result<f64> {
        if self.n != expected.n {
            return Err(MatmulError::Config(format!(
                "Cannot compare {}x{} against {}x{}",
                self.n, self.n, expected.n, expected.n
            )));
        }

        Ok(self
            .data
            .iter()
            .zip(&expected.data)
            .map(|(&got, &want)| {
                let want = want.to_f64();
                (got.to_f64() - want).abs() / want.abs().max(1.0)
            })
            .fold(0.0, f64::max))
    }
}

impl<T: Scalar> fmt::Display for DenseMatrix<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.n {
            let row = self.row(i);
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
