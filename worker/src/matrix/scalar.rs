//! Element types for the multiply kernel.
//!
//! The kernel is written once against [`Scalar`]; [`Precision`] is the
//! run-time switch that picks the instantiation at startup.

use crate::comm::Payload;
use crate::errors::{MatmulError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul};
use std::str::FromStr;

/// Floating point width used for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit IEEE float
    #[default]
    F32,
    /// 64-bit IEEE float
    F64,
}

impl Precision {
    /// Size in bytes of a single element.
    pub fn size_bytes(&self) -> usize {
        match self {
            Precision::F32 => 4,
            Precision::F64 => 8,
        }
    }

    /// Relative error allowed when comparing against the sequential product.
    pub fn tolerance(&self) -> f64 {
        match self {
            Precision::F32 => 1e-5,
            Precision::F64 => 1e-12,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::F32 => write!(f, "f32"),
            Precision::F64 => write!(f, "f64"),
        }
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float" | "single" => Ok(Precision::F32),
            "f64" | "double" => Ok(Precision::F64),
            other => Err(format!(
                "unknown precision '{}', expected f32 or f64",
                other
            )),
        }
    }
}

/// Numeric element of a matrix taking part in the ring multiply.
pub trait Scalar:
    Copy
    + Default
    + PartialEq
    + PartialOrd
    + fmt::Debug
    + fmt::Display
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Mul<Output = Self>
    + AddAssign
{
    const ZERO: Self;
    const ONE: Self;
    const PRECISION: Precision;

    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;

    /// Wrap a buffer for the wire without copying.
    fn into_payload(data: Vec<Self>) -> Payload;

    /// Unwrap a buffer received from a peer.
    ///
    /// # Errors
    /// Returns [`MatmulError::Protocol`] if the payload carries the other precision
    /// or no matrix data at all.
    fn from_payload(payload: Payload) -> Result<Vec<Self>>;
}

macro_rules! impl_scalar {
    ($ty:ty, $variant:ident, $precision:expr) => {
        impl Scalar for $ty {
            const ZERO: Self = 0.0;
            const ONE: Self = 1.0;
            const PRECISION: Precision = $precision;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            fn into_payload(data: Vec<Self>) -> Payload {
                Payload::$variant(data)
            }

            fn from_payload(payload: Payload) -> Result<Vec<Self>> {
                match payload {
                    Payload::$variant(data) => Ok(data),
                    other => Err(MatmulError::Protocol(format!(
                        "expected {} matrix data, received {}",
                        $precision,
                        other.kind()
                    ))),
                }
            }
        }
    };
}

impl_scalar!(f32, F32, Precision::F32);
impl_scalar!(f64, F64, Precision::F64);
