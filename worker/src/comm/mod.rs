//! Process topology: who we are in the ring and how we talk to our neighbours.
//!
//! The whole algorithm needs exactly one communication primitive, a paired
//! exchange that sends to the right neighbour while receiving from the left
//! one. Two transports provide it:
//! - [`ChannelComm`]: in-process ranks joined by tokio channels
//! - [`TcpComm`]: one OS process per rank, length-prefixed CBOR over TCP

pub mod channel;
pub mod message;
pub mod tcp;

pub use channel::ChannelComm;
pub use message::{Payload, Phase, RingMessage};
pub use tcp::{TcpComm, TcpOptions};

use crate::errors::Result;
use crate::ring::Ring;
use async_trait::async_trait;

/// A rank's view of the ring.
#[async_trait]
pub trait Communicator: Send {
    /// This rank, in `0..size()`
    fn rank(&self) -> usize;

    /// Number of ranks in the ring
    fn size(&self) -> usize;

    /// Send `outgoing` to the right neighbour and receive the left neighbour's
    /// message for the same step. Both directions progress concurrently, so a
    /// ring where every rank calls this at once cannot deadlock.
    async fn send_recv(&mut self, outgoing: RingMessage) -> Result<RingMessage>;

    /// Rank we receive from
    fn left(&self) -> usize {
        Ring::left(self.rank(), self.size())
    }

    /// Rank we send to
    fn right(&self) -> usize {
        Ring::right(self.rank(), self.size())
    }
}
