//! Matrix element types, whole-matrix views and seeded initialization.

pub mod dense;
pub mod init;
pub mod scalar;

pub use dense::DenseMatrix;
pub use init::{MatrixInitializer, Operand};
pub use scalar::{Precision, Scalar};
