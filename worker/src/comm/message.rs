//! Messages exchanged between ring neighbours.

use crate::config::RunParams;
use crate::errors::{MatmulError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which part of a run a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Run parameters travelling out from rank 0
    Agreement,
    /// A column shard of B moving one hop around the ring
    Rotation,
    /// A finished row band of C travelling towards rank 0
    Gather,
}

/// Body of a ring message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Agreed run parameters
    Params(RunParams),
    /// Placeholder from a rank that has nothing to forward yet
    Empty,
    /// Matrix data in single precision
    F32(Vec<f32>),
    /// Matrix data in double precision
    F64(Vec<f64>),
}

impl Payload {
    /// Short name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Params(_) => "params",
            Payload::Empty => "empty",
            Payload::F32(_) => "f32",
            Payload::F64(_) => "f64",
        }
    }

    /// Number of matrix elements carried (0 for non-data payloads)
    pub fn len(&self) -> usize {
        match self {
            Payload::F32(data) => data.len(),
            Payload::F64(data) => data.len(),
            Payload::Params(_) | Payload::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One hop of data between neighbouring ranks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingMessage {
    /// Run this message belongs to (nil until agreement completes)
    pub job_id: Uuid,
    /// Current phase of the run
    pub phase: Phase,
    /// Step number within the phase
    pub step: u32,
    /// Rank whose shard or band this payload originally was
    pub origin: u32,
    /// Message body
    pub payload: Payload,
    /// Unix timestamp when the message was created
    pub timestamp: u64,
}

impl RingMessage {
    /// Create a new message with current timestamp
    pub fn new(job_id: Uuid, phase: Phase, step: usize, origin: usize, payload: Payload) -> Self {
        Self {
            job_id,
            phase,
            step: step as u32,
            origin: origin as u32,
            payload,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    /// Check that a received message is the one the schedule expects next.
    ///
    /// # Errors
    /// Returns [`MatmulError::Protocol`] on any mismatch.
    pub fn check_schedule(
        &self,
        job_id: Uuid,
        phase: Phase,
        step: usize,
        origin: usize,
    ) -> Result<()> {
        if self.job_id != job_id {
            return Err(MatmulError::Protocol(format!(
                "message for job {} received during job {}",
                self.job_id, job_id
            )));
        }
        if self.phase != phase || self.step as usize != step || self.origin as usize != origin {
            return Err(MatmulError::Protocol(format!(
                "expected {:?} step {} from origin {}, received {:?} step {} from origin {}",
                phase, step, origin, self.phase, self.step, self.origin
            )));
        }
        Ok(())
    }

    /// Approximate in-memory size of the payload in bytes
    pub fn size_bytes(&self) -> usize {
        // UUID (16) + phase (1) + step (4) + origin (4) + timestamp (8)
        let fixed_size = 16 + 1 + 4 + 4 + 8;
        let payload_size = match &self.payload {
            Payload::F32(data) => data.len() * std::mem::size_of::<f32>(),
            Payload::F64(data) => data.len() * std::mem::size_of::<f64>(),
            Payload::Params(_) | Payload::Empty => 0,
        };
        fixed_size + payload_size
    }

    /// Serialize to CBOR bytes
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| MatmulError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| MatmulError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Precision;

    #[test]
    fn test_message_cbor_roundtrip() {
        let original = RingMessage::new(
            Uuid::new_v4(),
            Phase::Rotation,
            2,
            1,
            Payload::F64(vec![1.0, 2.5, -3.0]),
        );

        let bytes = original.to_cbor().unwrap();
        let decoded = RingMessage::from_cbor(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_params_payload_roundtrip() {
        let params = RunParams {
            job_id: Uuid::new_v4(),
            size: 12,
            precision: Precision::F64,
            seed: 99,
            verify: true,
        };
        let payload = Payload::Params(params.clone());
        let msg = RingMessage::new(Uuid::nil(), Phase::Agreement, 0, 0, payload);

        let decoded = RingMessage::from_cbor(&msg.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded.payload, Payload::Params(params));
    }

    #[test]
    fn test_from_cbor_garbage() {
        let result = RingMessage::from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(MatmulError::Serialization(_))));
    }

    #[test]
    fn test_expect_accepts_scheduled_message() {
        let job = Uuid::new_v4();
        let msg = RingMessage::new(job, Phase::Gather, 1, 3, Payload::F32(vec![0.0; 4]));
        assert!(msg.check_schedule(job, Phase::Gather, 1, 3).is_ok());
    }

    #[test]
    fn test_expect_rejects_wrong_origin_and_job() {
        let job = Uuid::new_v4();
        let msg = RingMessage::new(job, Phase::Rotation, 0, 2, Payload::F32(vec![]));
        assert!(matches!(
            msg.check_schedule(job, Phase::Rotation, 0, 1),
            Err(MatmulError::Protocol(_))
        ));
        assert!(matches!(
            msg.check_schedule(Uuid::new_v4(), Phase::Rotation, 0, 2),
            Err(MatmulError::Protocol(_))
        ));
    }

    #[test]
    fn test_size_bytes() {
        let msg = RingMessage::new(Uuid::nil(), Phase::Rotation, 0, 0, Payload::F64(vec![0.0; 10]));
        assert_eq!(msg.size_bytes(), 33 + 80);
        assert_eq!(msg.payload.len(), 10);
    }
}
