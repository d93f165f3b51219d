//! Ring-based distributed dense matrix multiply.
//!
//! `C = A · B` for square matrices split over `P` ranks arranged in a ring.
//! Each rank owns a row band of A and C; column shards of B rotate around the
//! ring so that after `P` steps every rank has seen all of B.

pub mod agreement;
pub mod assembly;
pub mod comm;
pub mod config;
pub mod decomposition;
pub mod errors;
pub mod matrix;
pub mod observability;
pub mod ring;
pub mod runner;

pub use agreement::agree_params;
pub use assembly::gather_product;
pub use comm::{ChannelComm, Communicator, Payload, Phase, RingMessage, TcpComm, TcpOptions};
pub use config::{RunConfig, RunParams};
pub use decomposition::{ColumnShard, Decomposition, RowBand};
pub use errors::{MatmulError, Result};
pub use matrix::{DenseMatrix, MatrixInitializer, Precision, Scalar};
pub use observability::{init_production_logging, init_simple_logging};
pub use ring::{EngineOutput, Ring, RingEngine, RingStats, StepRecord};
pub use runner::{
    multiply_in_process, run_local_cluster, run_worker, LocalProduct, Product, RunReport,
    Verification, WorkerOptions,
};
