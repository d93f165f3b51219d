//! Per-run counters for the ring engine

use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Statistics for one rank's pass through the ring
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RingStats {
    /// Local compute passes performed
    pub steps: u64,

    /// Shard exchanges completed
    pub exchanges: u64,

    /// Payload bytes sent to the right neighbour
    pub bytes_sent: u64,

    /// Time spent in the local kernel
    pub compute_time: Duration,

    /// Time spent blocked in shard exchanges
    pub exchange_time: Duration,
}

impl RingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local compute pass
    pub fn record_compute(&mut self, elapsed: Duration) {
        self.steps += 1;
        self.compute_time += elapsed;
    }

    /// Record a completed exchange
    pub fn record_exchange(&mut self, bytes: usize, elapsed: Duration) {
        self.exchanges += 1;
        self.bytes_sent += bytes as u64;
        self.exchange_time += elapsed;
    }

    /// Fraction of engine time spent communicating (0.0 when nothing ran)
    pub fn exchange_ratio(&self) -> f64 {
        let total = self.compute_time + self.exchange_time;
        if total.is_zero() {
            return 0.0;
        }
        self.exchange_time.as_secs_f64() / total.as_secs_f64()
    }

    pub fn log_summary(&self, rank: usize) {
        info!(
            rank,
            steps = self.steps,
            exchanges = self.exchanges,
            bytes_sent = self.bytes_sent,
            compute_ms = self.compute_time.as_millis() as u64,
            exchange_ms = self.exchange_time.as_millis() as u64,
            "Ring statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_exchange() {
        let mut stats = RingStats::new();
        stats.record_exchange(1024, Duration::from_millis(5));
        stats.record_exchange(1024, Duration::from_millis(7));
        assert_eq!(stats.exchanges, 2);
        assert_eq!(stats.bytes_sent, 2048);
        assert_eq!(stats.exchange_time, Duration::from_millis(12));
    }

    #[test]
    fn test_exchange_ratio() {
        let mut stats = RingStats::new();
        assert_eq!(stats.exchange_ratio(), 0.0);

        stats.record_compute(Duration::from_millis(30));
        stats.record_exchange(8, Duration::from_millis(10));
        assert!((stats.exchange_ratio() - 0.25).abs() < 1e-9);
        assert_eq!(stats.steps, 1);
    }
}
