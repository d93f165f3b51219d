use thiserror::Error;

/// Errors that can occur while running the ring multiply.
#[derive(Error, Debug)]
pub enum MatmulError {
    /// IO error occurred (config files, sockets, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error (CBOR frames, TOML config)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (size not divisible by worker count, bad values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Communication error (peer disconnected, channel closed, connect failed)
    #[error("Communication error: {0}")]
    Communication(String),

    /// A peer sent a frame that does not fit the ring schedule
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Shard exchange did not complete in time
    #[error("Exchange at step {step} timed out after {timeout_ms}ms")]
    Timeout { step: usize, timeout_ms: u64 },

    /// Worker task failed outside the algorithm (panic, cancellation)
    #[error("Execution error: {0}")]
    Execution(String),
}

/// Result type alias for ring multiply operations.
pub type Result<T> = std::result::Result<T, MatmulError>;

impl From<toml::ser::Error> for MatmulError {
    fn from(e: toml::ser::Error) -> Self {
        MatmulError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for MatmulError {
    fn from(e: toml::de::Error) -> Self {
        MatmulError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MatmulError::Config("matrix size 7 is not divisible by 2 workers".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: matrix size 7 is not divisible by 2 workers"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = MatmulError::Timeout {
            step: 3,
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "Exchange at step 3 timed out after 250ms");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: MatmulError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_toml_error_conversion() {
        let de_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: MatmulError = de_err.into();
        assert!(matches!(err, MatmulError::Serialization(_)));
    }
}
