//! Collecting the row bands of C on rank 0.
//!
//! The gather reuses the neighbour exchange: for `P - 1` steps every rank
//! passes on the band it most recently received, so the band of rank `r`
//! reaches rank 0 after `P - r` hops. A band that has already passed rank 0
//! is replaced by an empty placeholder instead of travelling further.

use crate::comm::{Communicator, Payload, Phase, RingMessage};
use crate::decomposition::{Decomposition, RowBand};
use crate::errors::{MatmulError, Result};
use crate::matrix::{DenseMatrix, Scalar};
use crate::ring::Ring;
use tracing::{debug, info};
use uuid::Uuid;

/// Send every rank's C band to rank 0.
///
/// Returns the assembled product on rank 0 and `None` everywhere else.
pub async fn gather_product<C, T>(
    comm: &mut C,
    decomposition: &Decomposition,
    job_id: Uuid,
    band: RowBand<T>,
) -> Result<Option<DenseMatrix<T>>>
where
    C: Communicator + ?Sized,
    T: Scalar,
{
    let rank = decomposition.rank();
    let p = decomposition.world_size();
    let n = decomposition.n();
    let left = Ring::left(rank, p);

    let mut product = if rank == 0 {
        let mut full = DenseMatrix::zeros(n);
        place_band(&mut full, decomposition, 0, band.as_slice());
        Some(full)
    } else {
        None
    };

    // Band this rank forwards next; it is its own band before the first step
    let mut carried = if rank == 0 { None } else { Some(band.into_vec()) };

    for step in 0..p.saturating_sub(1) {
        let send_origin = Ring::origin(rank, step, p);
        let recv_origin = Ring::origin(rank, step + 1, p);

        // rank r's data at step s started at r - s; it still needs to travel
        // only if that did not wrap past rank 0
        let payload = match carried.take() {
            Some(data) if step < rank => T::into_payload(data),
            _ => Payload::Empty,
        };
        let outgoing = RingMessage::new(job_id, Phase::Gather, step, send_origin, payload);
        let incoming = comm.send_recv(outgoing).await?;
        incoming.check_schedule(job_id, Phase::Gather, step, recv_origin)?;

        if step >= left {
            if !matches!(incoming.payload, Payload::Empty) {
                return Err(MatmulError::Protocol(format!(
                    "gather step {} expected no data from rank {}, received {}",
                    step,
                    left,
                    incoming.payload.kind()
                )));
            }
            continue;
        }

        let data = T::from_payload(incoming.payload)?;
        if data.len() != decomposition.tile_len() {
            return Err(MatmulError::Protocol(format!(
                "band of rank {} has {} elements, expected {}",
                recv_origin,
                data.len(),
                decomposition.tile_len()
            )));
        }

        match product.as_mut() {
            Some(full) => {
                debug!(step, origin = recv_origin, "Placed row band");
                place_band(full, decomposition, recv_origin, &data);
            }
            None => carried = Some(data),
        }
    }

    if product.is_some() {
        info!(n, world_size = p, "Assembled product");
    }
    Ok(product)
}

fn place_band<T: Scalar>(
    full: &mut DenseMatrix<T>,
    decomposition: &Decomposition,
    origin: usize,
    data: &[T],
) {
    let n = decomposition.n();
    let rows = decomposition.band_range(origin);
    full.as_mut_slice()[rows.start * n..rows.end * n].copy_from_slice(data);
}
