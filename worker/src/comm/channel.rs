//! In-process ring built from bounded tokio channels.

use super::{Communicator, RingMessage};
use crate::errors::{MatmulError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Links buffer a single message, so a rank can run at most one exchange
/// ahead of its right neighbour.
const LINK_CAPACITY: usize = 1;

/// One rank of an in-process ring.
#[derive(Debug)]
pub struct ChannelComm {
    rank: usize,
    size: usize,
    to_right: mpsc::Sender<RingMessage>,
    from_left: mpsc::Receiver<RingMessage>,
}

impl ChannelComm {
    /// Build a ring of `size` connected ranks, returned in rank order.
    ///
    /// Link `i` carries messages from rank `i` to rank `(i + 1) % size`.
    pub fn ring(size: usize) -> Vec<ChannelComm> {
        let (senders, mut receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::channel(LINK_CAPACITY)).unzip();

        // rank r receives on the link owned by its left neighbour
        receivers.rotate_right(1);

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (to_right, from_left))| ChannelComm {
                rank,
                size,
                to_right,
                from_left,
            })
            .collect()
    }
}

#[async_trait]
impl Communicator for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn send_recv(&mut self, outgoing: RingMessage) -> Result<RingMessage> {
        let right = self.right();
        let left = self.left();
        let to_right = &self.to_right;
        let from_left = &mut self.from_left;

        let send = async {
            to_right.send(outgoing).await.map_err(|_| {
                MatmulError::Communication(format!("link to rank {} is closed", right))
            })
        };
        let recv = async {
            from_left.recv().await.ok_or_else(|| {
                MatmulError::Communication(format!("rank {} disconnected", left))
            })
        };

        let ((), incoming) = tokio::try_join!(send, recv)?;
        Ok(incoming)
    }
}
