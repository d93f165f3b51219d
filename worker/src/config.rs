use crate::comm::TcpOptions;
use crate::errors::{MatmulError, Result};
use crate::matrix::Precision;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Parameters every rank must agree on before decomposing the problem.
///
/// Rank 0 owns these and sends them around the ring at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub job_id: Uuid,
    /// Matrix dimension n (A, B and C are n × n)
    pub size: usize,
    pub precision: Precision,
    /// Seed for the deterministic input generator
    pub seed: u64,
    /// Compare the product against the sequential reference on rank 0
    pub verify: bool,
}

impl RunParams {
    /// Fresh parameters with a new job id
    pub fn new(size: usize, precision: Precision, seed: u64, verify: bool) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            size,
            precision,
            seed,
            verify,
        }
    }
}

/// Main configuration for `ringmm`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub problem: ProblemConfig,
    pub cluster: ClusterConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
    pub output: OutputConfig,
}

/// What to multiply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemConfig {
    pub size: usize,
    pub precision: Precision,
    pub seed: u64,
    pub verify: bool,
}

/// How the ring runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Ranks in an in-process ring
    pub workers: usize,
    /// Kernel threads per rank (1 = serial kernel)
    pub threads: usize,
    /// Per-exchange timeout, 0 disables it
    pub exchange_timeout_ms: u64,
    pub max_frame_bytes: usize,
}

/// TCP ring membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Listen address of every rank, in rank order
    pub peers: Vec<String>,
    pub connect_retries: u32,
    pub connect_backoff_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
    pub log_dir: String,
}

/// Result printing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Print the product when n is below this
    pub print_threshold: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            problem: ProblemConfig {
                size: 1000,
                precision: Precision::F32,
                seed: 42,
                verify: false,
            },
            cluster: ClusterConfig {
                workers: 4,
                threads: 1,
                exchange_timeout_ms: 0,
                max_frame_bytes: crate::comm::tcp::DEFAULT_MAX_FRAME_BYTES,
            },
            transport: TransportConfig {
                peers: Vec::new(),
                connect_retries: 50,
                connect_backoff_ms: 100,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_to_file: false,
                log_dir: "~/.ringmm/logs".to_string(),
            },
            output: OutputConfig { print_threshold: 20 },
        }
    }
}

impl RunConfig {
    /// Get default configuration file path: `~/.ringmm/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| MatmulError::Config("Cannot determine home directory".into()))?;
        Ok(home.join(".ringmm").join("config.toml"))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            e
        })?;

        let config: RunConfig = toml::from_str(&content)?;

        config.validate()?;

        tracing::info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Load `path` if given, else the default path if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(&expand_path(path)),
            None => {
                let default = Self::default_path()?;
                if default.exists() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.problem.size == 0 {
            return Err(MatmulError::Config("problem.size must be at least 1".into()));
        }

        if self.cluster.workers == 0 {
            return Err(MatmulError::Config("cluster.workers must be at least 1".into()));
        }

        if self.cluster.threads == 0 {
            return Err(MatmulError::Config("cluster.threads must be at least 1".into()));
        }

        // A frame must at least fit an empty message
        if self.cluster.max_frame_bytes < 64 {
            return Err(MatmulError::Config(
                "cluster.max_frame_bytes must be at least 64".into(),
            ));
        }

        if self.transport.connect_retries == 0 {
            return Err(MatmulError::Config(
                "transport.connect_retries must be at least 1".into(),
            ));
        }

        self.peer_addrs()?;

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(MatmulError::Config(
                    "log level must be one of: trace, debug, info, warn, error".into(),
                ))
            }
        }

        Ok(())
    }

    /// Save configuration to file (atomic write)
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!(
                    path = %parent.display(),
                    error = %e,
                    "Failed to create config directory"
                );
                e
            })?;
        }

        let toml_string = toml::to_string_pretty(self)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &toml_string).map_err(|e| {
            tracing::error!(
                path = %temp_path.display(),
                error = %e,
                "Failed to write temp config file"
            );
            e
        })?;

        std::fs::rename(&temp_path, path).map_err(|e| {
            tracing::error!(
                from = %temp_path.display(),
                to = %path.display(),
                error = %e,
                "Failed to rename temp config file"
            );
            e
        })?;

        tracing::info!(path = %path.display(), "Configuration saved successfully");
        Ok(())
    }

    /// Fresh run parameters from the `[problem]` section
    pub fn run_params(&self) -> RunParams {
        RunParams::new(
            self.problem.size,
            self.problem.precision,
            self.problem.seed,
            self.problem.verify,
        )
    }

    /// Parsed `[transport] peers`
    pub fn peer_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.transport
            .peers
            .iter()
            .map(|peer| {
                peer.parse::<SocketAddr>().map_err(|e| {
                    MatmulError::Config(format!("Invalid peer address '{}': {}", peer, e))
                })
            })
            .collect()
    }

    pub fn exchange_timeout(&self) -> Option<Duration> {
        match self.cluster.exchange_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn tcp_options(&self) -> TcpOptions {
        TcpOptions {
            max_frame_bytes: self.cluster.max_frame_bytes,
            connect_retries: self.transport.connect_retries,
            connect_backoff: Duration::from_millis(self.transport.connect_backoff_ms),
        }
    }

    /// `[logging] log_dir` with `~` and environment variables expanded
    pub fn log_dir(&self) -> PathBuf {
        expand_path(Path::new(&self.logging.log_dir))
    }
}

/// Expand `~` and `$VARS` in a user-supplied path, leaving it unchanged on failure.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();

        assert_eq!(config.problem.size, 1000);
        assert_eq!(config.problem.precision, Precision::F32);
        assert_eq!(config.cluster.workers, 4);
        assert_eq!(config.output.print_threshold, 20);
        assert_eq!(config.logging.level, "info");
        assert!(config.exchange_timeout().is_none());
    }

    #[test]
    fn test_config_validation() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_sizes() {
        let mut config = RunConfig::default();
        config.problem.size = 0;
        assert!(config.validate().is_err());

        config.problem.size = 16;
        config.cluster.workers = 0;
        assert!(config.validate().is_err());

        config.cluster.workers = 2;
        config.cluster.threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_peer_address() {
        let mut config = RunConfig::default();
        config.transport.peers = vec!["127.0.0.1:7000".to_string(), "not-an-address".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not-an-address"), "{}", err);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = RunConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = RunConfig::default();
        config.problem.precision = Precision::F64;
        config.problem.verify = true;
        config.transport.peers = vec!["127.0.0.1:7000".to_string(), "127.0.0.1:7001".to_string()];
        config.save(&config_path).unwrap();

        let loaded = RunConfig::load(&config_path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.peer_addrs().unwrap().len(), 2);
        assert!(!config_path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_load_rejects_bad_toml_value() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut content = toml::to_string_pretty(&RunConfig::default()).unwrap();
        content = content.replace("precision = \"f32\"", "precision = \"f16\"");
        std::fs::write(&config_path, content).unwrap();

        let err = RunConfig::load(&config_path).unwrap_err();
        assert!(matches!(err, MatmulError::Serialization(_)), "{}", err);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = RunConfig::load(&temp_dir.path().join("missing.toml"));
        assert!(matches!(result, Err(MatmulError::Io(_))));
    }

    #[test]
    fn test_runtime_settings() {
        let mut config = RunConfig::default();
        config.cluster.exchange_timeout_ms = 250;
        config.transport.connect_backoff_ms = 10;

        assert_eq!(config.exchange_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.tcp_options().connect_backoff, Duration::from_millis(10));

        let params = config.run_params();
        assert_eq!(params.size, 1000);
        assert_ne!(params.job_id, Uuid::nil());
    }

    #[test]
    fn test_expand_path_keeps_plain_paths() {
        assert_eq!(expand_path(Path::new("/tmp/ringmm")), PathBuf::from("/tmp/ringmm"));
    }
}
