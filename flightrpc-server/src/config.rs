//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via FLIGHTRPC_CONFIG or --config)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Invocation semantics for duplicate requests.
    pub semantics: InvocationSemantics,
    /// Request reassembly configuration.
    pub reassembly: ReassemblyConfig,
    /// Duplicate filter configuration.
    pub dedup: DedupConfig,
    /// Callback delivery configuration.
    pub callback: CallbackConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FLIGHTRPC_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.reassembly.apply_env_overrides();
        self.dedup.apply_env_overrides();
        self.callback.apply_env_overrides();

        if let Ok(mode) = std::env::var("FLIGHTRPC_MODE") {
            match mode.parse() {
                Ok(semantics) => self.semantics = semantics,
                Err(e) => tracing::warn!("Ignoring FLIGHTRPC_MODE: {}", e),
            }
        }
    }

    /// Checks values that would stall or panic the background tasks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reassembly.sweep_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reassembly.sweep_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.reassembly.max_packets_per_message == 0 {
            return Err(ConfigError::ValidationError(
                "reassembly.max_packets_per_message must be greater than 0".to_string(),
            ));
        }
        if self.dedup.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dedup.sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.callback.max_concurrent_sends == 0 {
            return Err(ConfigError::ValidationError(
                "callback.max_concurrent_sends must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host name or IP address to bind to.
    pub host: String,
    /// UDP port.
    pub port: u16,
    /// Time left for in-flight replies after the listener stops, in milliseconds.
    pub grace_period_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: flightrpc_protocol::DEFAULT_PORT,
            grace_period_ms: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("IP_ADDRESS") {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(port) = std::env::var("UDP_LISTENER_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }

        if let Ok(grace) = std::env::var("FLIGHTRPC_GRACE_PERIOD_MS") {
            if let Ok(ms) = grace.parse() {
                self.grace_period_ms = ms;
            }
        }
    }

    /// Resolves host and port to a socket address, preferring IPv4.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                ConfigError::ValidationError(format!("cannot resolve '{}': {}", self.host, e))
            })?
            .collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                ConfigError::ValidationError(format!("'{}' resolved to no addresses", self.host))
            })
    }

    /// Returns the shutdown grace period as Duration.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Whether retried requests re-run their handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationSemantics {
    /// Duplicate request IDs are dropped before dispatch.
    #[default]
    AtMostOnce,
    /// Every complete request is dispatched.
    AtLeastOnce,
}

impl InvocationSemantics {
    pub fn from_at_most_once(enabled: bool) -> Self {
        if enabled {
            InvocationSemantics::AtMostOnce
        } else {
            InvocationSemantics::AtLeastOnce
        }
    }

    pub fn is_at_most_once(&self) -> bool {
        *self == InvocationSemantics::AtMostOnce
    }
}

impl FromStr for InvocationSemantics {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "at_most_once" | "at-most-once" | "amo" => Ok(InvocationSemantics::AtMostOnce),
            "at_least_once" | "at-least-once" | "alo" => Ok(InvocationSemantics::AtLeastOnce),
            other => Err(ConfigError::ValidationError(format!(
                "unknown invocation semantics '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for InvocationSemantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationSemantics::AtMostOnce => write!(f, "at-most-once"),
            InvocationSemantics::AtLeastOnce => write!(f, "at-least-once"),
        }
    }
}

/// Request reassembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Pending requests older than this are evicted, in milliseconds.
    pub timeout_ms: u64,
    /// How often the eviction sweep runs, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Largest packet count a header may declare.
    pub max_packets_per_message: u64,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            sweep_interval_ms: 2000,
            max_packets_per_message: 4096,
        }
    }
}

impl ReassemblyConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("FLIGHTRPC_REASSEMBLY_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.timeout_ms = ms;
            }
        }
    }

    /// Returns the eviction timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the sweep interval as Duration (never zero).
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Duplicate filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long a seen request ID is remembered, in seconds.
    pub retention_secs: u64,
    /// How often expired IDs are swept, in seconds.
    pub sweep_interval_secs: u64,
    /// Re-send the cached reply to a duplicate instead of dropping it.
    pub replay_responses: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention_secs: 300,
            sweep_interval_secs: 300,
            replay_responses: false,
        }
    }
}

impl DedupConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(retention) = std::env::var("FLIGHTRPC_DEDUP_RETENTION_SECS") {
            if let Ok(secs) = retention.parse() {
                self.retention_secs = secs;
            }
        }

        if let Ok(replay) = std::env::var("FLIGHTRPC_DEDUP_REPLAY") {
            self.replay_responses = replay == "1" || replay.to_lowercase() == "true";
        }
    }

    /// Returns the retention window as Duration.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Returns the sweep interval as Duration (never zero).
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Callback delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Width of the per-notify send pool.
    pub max_concurrent_sends: usize,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: 10,
        }
    }
}

impl CallbackConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(width) = std::env::var("FLIGHTRPC_CALLBACK_CONCURRENCY") {
            if let Ok(n) = width.parse() {
                self.max_concurrent_sends = n;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.port, 8080);
        assert_eq!(config.network.host, "localhost");
        assert_eq!(config.network.grace_period(), Duration::from_secs(1));
        assert_eq!(config.semantics, InvocationSemantics::AtMostOnce);
        assert_eq!(config.reassembly.timeout(), Duration::from_secs(5));
        assert_eq!(config.reassembly.sweep_interval(), Duration::from_secs(2));
        assert_eq!(config.dedup.retention(), Duration::from_secs(300));
        assert_eq!(config.dedup.sweep_interval(), Duration::from_secs(300));
        assert!(!config.dedup.replay_responses);
        assert_eq!(config.callback.max_concurrent_sends, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.semantics = InvocationSemantics::AtLeastOnce;
        config.network.port = 9999;

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("at_least_once"));

        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.port, 9999);
        assert_eq!(parsed.semantics, InvocationSemantics::AtLeastOnce);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "network:\n  port: 9100\ndedup:\n  replay_responses: true").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.port, 9100);
        assert_eq!(config.network.host, "localhost");
        assert!(config.dedup.replay_responses);
        assert_eq!(config.dedup.retention_secs, 300);
        assert_eq!(config.reassembly.max_packets_per_message, 4096);
    }

    #[test]
    fn test_from_file_errors() {
        let result = Config::from_file("/nonexistent/flightrpc.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(..))));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "network: [not, a, map]").unwrap();
        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(..))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flightrpc.yaml");

        let mut config = Config::default();
        config.callback.max_concurrent_sends = 4;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.callback.max_concurrent_sends, 4);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.callback.max_concurrent_sends = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.reassembly.sweep_interval_ms = 0;
        assert!(config.validate().is_err());
        assert_eq!(config.reassembly.sweep_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_semantics_parse() {
        assert_eq!(
            "at_most_once".parse::<InvocationSemantics>().unwrap(),
            InvocationSemantics::AtMostOnce
        );
        assert_eq!(
            "At-Least-Once".parse::<InvocationSemantics>().unwrap(),
            InvocationSemantics::AtLeastOnce
        );
        assert!("sometimes".parse::<InvocationSemantics>().is_err());

        assert!(InvocationSemantics::from_at_most_once(true).is_at_most_once());
        assert!(!InvocationSemantics::from_at_most_once(false).is_at_most_once());
        assert_eq!(InvocationSemantics::AtMostOnce.to_string(), "at-most-once");
    }

    #[test]
    fn test_bind_addr() {
        let network = NetworkConfig {
            host: "127.0.0.1".to_string(),
            port: 4000,
            grace_period_ms: 0,
        };
        assert_eq!(
            network.bind_addr().unwrap(),
            "127.0.0.1:4000".parse::<SocketAddr>().unwrap()
        );
    }
}
