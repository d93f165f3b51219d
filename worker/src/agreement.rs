//! Startup agreement on run parameters.
//!
//! Rank 0 decides the problem; every other rank learns it by relaying
//! [`RunParams`] one hop at a time around the ring. After `P - 1` exchanges
//! the parameters have visited every rank.

use crate::comm::{Communicator, Payload, Phase, RingMessage};
use crate::config::RunParams;
use crate::errors::{MatmulError, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Agree on rank 0's parameters.
///
/// Rank 0 must pass `Some`. Other ranks may pass what they were configured
/// with; rank 0's values win and a mismatch is only logged.
///
/// # Errors
/// Returns [`MatmulError::Config`] if rank 0 has no parameters, or
/// [`MatmulError::Protocol`] if a relayed message is not a parameter message.
pub async fn agree_params<C>(comm: &mut C, local: Option<RunParams>) -> Result<RunParams>
where
    C: Communicator + ?Sized,
{
    let rank = comm.rank();
    let size = comm.size();

    if rank == 0 && local.is_none() {
        return Err(MatmulError::Config(
            "rank 0 must be given the run parameters".to_string(),
        ));
    }

    if size == 1 {
        return local.ok_or_else(|| {
            MatmulError::Config("a single-rank ring needs local run parameters".to_string())
        });
    }

    // What this rank currently knows to be rank 0's decision
    let mut known = if rank == 0 { local.clone() } else { None };

    for step in 0..size - 1 {
        let payload = match &known {
            Some(params) => Payload::Params(params.clone()),
            None => Payload::Empty,
        };
        let outgoing = RingMessage::new(Uuid::nil(), Phase::Agreement, step, 0, payload);
        let incoming = comm.send_recv(outgoing).await?;
        incoming.check_schedule(Uuid::nil(), Phase::Agreement, step, 0)?;

        match incoming.payload {
            Payload::Params(params) => {
                if known.is_none() {
                    debug!(rank, step, "Received run parameters");
                    known = Some(params);
                }
            }
            Payload::Empty => {}
            other => {
                return Err(MatmulError::Protocol(format!(
                    "expected run parameters during agreement, received {}",
                    other.kind()
                )))
            }
        }
    }

    let agreed = known.ok_or_else(|| {
        MatmulError::Protocol(format!(
            "rank {} finished agreement without hearing from rank 0",
            rank
        ))
    })?;

    if let Some(mine) = local.filter(|_| rank != 0) {
        if mine.size != agreed.size
            || mine.precision != agreed.precision
            || mine.seed != agreed.seed
            || mine.verify != agreed.verify
        {
            warn!(
                rank,
                local_size = mine.size,
                local_precision = %mine.precision,
                size = agreed.size,
                precision = %agreed.precision,
                "Local run parameters differ from rank 0, using rank 0's"
            );
        }
    }

    info!(
        rank,
        job_id = %agreed.job_id,
        size = agreed.size,
        precision = %agreed.precision,
        "Run parameters agreed"
    );
    Ok(agreed)
}
