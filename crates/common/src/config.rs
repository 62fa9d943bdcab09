use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Onion service constants
pub mod service {
    /// Default location of the PEM encoded service key
    pub const DEFAULT_KEY_PATH: &str = "onion.pk";

    /// Port advertised to clients on the onion address
    pub const DEFAULT_REMOTE_PORT: u16 = 80;

    /// How long the network may take to come up and publish the service
    pub const LISTEN_TIMEOUT_SECS: u64 = 180;

    /// Top level domain of the overlay network
    pub const TLD: &str = "onion";
}

/// Local development constants
pub mod dev {
    /// Port served in dev mode, bypassing the overlay entirely
    pub const DEFAULT_LOCAL_PORT: u16 = 9090;
}

/// Tor process constants
pub mod tor {
    /// Binary looked up on `PATH` when none is configured
    pub const DEFAULT_BINARY: &str = "tor";

    /// Grace period for the process to exit after a halt signal
    pub const SHUTDOWN_GRACE_SECS: u64 = 5;

    /// Poll interval while waiting on the control port and bootstrap
    pub const POLL_INTERVAL_MILLIS: u64 = 250;
}

/// Which server answers requests. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeMode {
    /// Plain listener on `local_addr`; no identity, no overlay
    Dev,
    /// Publish through the overlay network under the service key
    Onion,
}

impl Default for ServeMode {
    fn default() -> Self {
        Self::Onion
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Serving mode
    pub mode: ServeMode,

    /// Path to the PEM encoded Ed25519 private key
    pub key_path: PathBuf,

    /// Listen address used in dev mode
    pub local_addr: SocketAddr,

    /// Bound on network readiness plus publication
    pub listen_timeout_secs: u64,

    /// Port advertised on the onion address
    pub remote_port: u16,

    /// Tor executable
    pub tor_binary: PathBuf,

    /// Start tor with `--hush` and discard its output
    pub quiet: bool,

    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mode: ServeMode::default(),
            key_path: PathBuf::from(service::DEFAULT_KEY_PATH),
            local_addr: SocketAddr::from(([127, 0, 0, 1], dev::DEFAULT_LOCAL_PORT)),
            listen_timeout_secs: service::LISTEN_TIMEOUT_SECS,
            remote_port: service::DEFAULT_REMOTE_PORT,
            tor_binary: PathBuf::from(tor::DEFAULT_BINARY),
            quiet: true,
            verbose: false,
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: ServeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = path.into();
        self
    }

    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = addr;
        self
    }

    pub fn with_listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_tor_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.tor_binary = binary.into();
        self
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }

    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run could succeed with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "listen_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    InvalidValue(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),
}
