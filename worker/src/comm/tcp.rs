//! TCP ring transport.
//!
//! Every rank listens on its own address, dials its right neighbour and accepts
//! its left neighbour, so each rank owns exactly two sockets. Frames are a
//! big-endian `u32` length followed by a CBOR-encoded [`RingMessage`].

use super::{Communicator, RingMessage};
use crate::errors::{MatmulError, Result};
use crate::ring::Ring;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Default cap on a single frame (512 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;

/// Connection settings for a TCP ring
#[derive(Debug, Clone)]
pub struct TcpOptions {
    /// Largest frame accepted or sent
    pub max_frame_bytes: usize,
    /// Attempts to reach the right neighbour before giving up
    pub connect_retries: u32,
    /// Pause between connection attempts
    pub connect_backoff: Duration,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            connect_retries: 50,
            connect_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
struct Links {
    right: TcpStream,
    left: TcpStream,
}

/// One rank of a TCP ring.
#[derive(Debug)]
pub struct TcpComm {
    rank: usize,
    size: usize,
    links: Option<Links>,
    max_frame_bytes: usize,
}

impl TcpComm {
    /// Bind `peers[rank]` and join the ring.
    pub async fn connect(rank: usize, peers: &[SocketAddr], options: TcpOptions) -> Result<Self> {
        let addr = peer_addr(peers, rank)?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            MatmulError::Communication(format!("rank {} cannot listen on {}: {}", rank, addr, e))
        })?;
        Self::establish(rank, peers, listener, options).await
    }

    /// Join the ring using an already bound listener.
    ///
    /// Useful when the listener was bound to port 0 and the peers list was
    /// built from the resulting local addresses.
    pub async fn establish(
        rank: usize,
        peers: &[SocketAddr],
        listener: TcpListener,
        options: TcpOptions,
    ) -> Result<Self> {
        let size = peers.len();
        peer_addr(peers, rank)?;

        if size == 1 {
            return Ok(Self {
                rank,
                size,
                links: None,
                max_frame_bytes: options.max_frame_bytes,
            });
        }

        let right_rank = Ring::right(rank, size);
        let left_rank = Ring::left(rank, size);
        let right_addr = peers[right_rank];

        let (right, left) = tokio::try_join!(
            dial(rank, right_addr, &options),
            accept_from(&listener, left_rank)
        )?;

        info!(
            rank,
            size,
            right = %right_addr,
            left_rank,
            "Joined TCP ring"
        );

        Ok(Self {
            rank,
            size,
            links: Some(Links { right, left }),
            max_frame_bytes: options.max_frame_bytes,
        })
    }
}

#[async_trait]
impl Communicator for TcpComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn send_recv(&mut self, outgoing: RingMessage) -> Result<RingMessage> {
        let limit = self.max_frame_bytes;
        let links = self.links.as_mut().ok_or_else(|| {
            MatmulError::Communication("a single-rank ring has no neighbours".to_string())
        })?;
        let Links { right, left } = links;

        let ((), incoming) =
            tokio::try_join!(write_frame(right, &outgoing, limit), read_frame(left, limit))?;
        Ok(incoming)
    }
}

fn peer_addr(peers: &[SocketAddr], rank: usize) -> Result<SocketAddr> {
    peers.get(rank).copied().ok_or_else(|| {
        MatmulError::Config(format!(
            "rank {} has no address in a peer list of {}",
            rank,
            peers.len()
        ))
    })
}

/// Connect to the right neighbour, retrying while it starts up, then announce our rank.
async fn dial(rank: usize, addr: SocketAddr, options: &TcpOptions) -> Result<TcpStream> {
    let mut attempt = 0;
    let mut stream = loop {
        attempt += 1;
        match TcpStream::connect(addr).await {
            Ok(stream) => break stream,
            Err(e) if attempt < options.connect_retries => {
                debug!(%addr, attempt, error = %e, "Right neighbour not reachable yet");
                tokio::time::sleep(options.connect_backoff).await;
            }
            Err(e) => {
                return Err(MatmulError::Communication(format!(
                    "could not reach right neighbour at {} after {} attempts: {}",
                    addr, attempt, e
                )));
            }
        }
    };

    stream.set_nodelay(true)?;
    stream.write_all(&(rank as u32).to_be_bytes()).await?;
    stream.flush().await?;
    Ok(stream)
}

/// Accept the left neighbour and check it is who the ring says it should be.
async fn accept_from(listener: &TcpListener, left_rank: usize) -> Result<TcpStream> {
    let (mut stream, addr) = listener.accept().await?;
    stream.set_nodelay(true)?;

    let mut rank_buf = [0u8; 4];
    stream.read_exact(&mut rank_buf).await?;
    let announced = u32::from_be_bytes(rank_buf) as usize;

    if announced != left_rank {
        return Err(MatmulError::Protocol(format!(
            "expected rank {} to connect, rank {} connected from {}",
            left_rank, announced, addr
        )));
    }

    debug!(%addr, left_rank, "Accepted left neighbour");
    Ok(stream)
}

/// Read a length-prefixed CBOR frame
pub async fn read_frame<T>(io: &mut T, limit: usize) -> Result<RingMessage>
where
    T: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await.map_err(closed_or_io)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > limit {
        return Err(MatmulError::Protocol(format!(
            "Message size {} exceeds limit {}",
            len, limit
        )));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await.map_err(closed_or_io)?;

    RingMessage::from_cbor(&buf)
}

/// Write a length-prefixed CBOR frame
pub async fn write_frame<T>(io: &mut T, message: &RingMessage, limit: usize) -> Result<()>
where
    T: AsyncWrite + Unpin + Send,
{
    let buf = message.to_cbor()?;

    if buf.len() > limit || buf.len() > u32::MAX as usize {
        return Err(MatmulError::Protocol(format!(
            "Message size {} exceeds limit {}",
            buf.len(),
            limit
        )));
    }

    let len = buf.len() as u32;
    io.write_all(&len.to_be_bytes()).await.map_err(closed_or_io)?;
    io.write_all(&buf).await.map_err(closed_or_io)?;
    io.flush().await.map_err(closed_or_io)?;

    Ok(())
}

fn closed_or_io(e: io::Error) -> MatmulError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => {
            MatmulError::Communication(format!("neighbour connection lost: {}", e))
        }
        _ => MatmulError::Io(e),
    }
}
