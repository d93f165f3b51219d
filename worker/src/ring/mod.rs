//! The ring rotation algorithm: topology arithmetic, the local kernel and the
//! step-by-step engine that ties them to a [`crate::comm::Communicator`].

pub mod engine;
pub mod kernel;
pub mod stats;
pub mod topology;

pub use engine::{EngineOutput, RingEngine, StepRecord};
pub use kernel::BandShape;
pub use stats::RingStats;
pub use topology::Ring;
