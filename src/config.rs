use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::protocol::DEFAULT_CHUNK_SIZE;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the control plane and agent uplink endpoint
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory where reassembled artifacts are written
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_download_dir() -> String {
    "./downloads".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            download_dir: default_download_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Chunk payload size agents are expected to use (default: 1 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    /// Fail a transfer when no chunk arrives for this long (default: 30s)
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    /// Allow several concurrent transfers per agent; `false` rejects new
    /// requests with AgentBusy while one is active
    #[serde(default = "default_concurrent_per_agent")]
    pub concurrent_per_agent: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_inactivity_timeout() -> u64 {
    30
}

fn default_concurrent_per_agent() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            concurrent_per_agent: default_concurrent_per_agent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("transfer.chunk_size_bytes", DEFAULT_CHUNK_SIZE as u64)?
            .set_default("transfer.inactivity_timeout_secs", 30)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("UPLINK_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (UPLINK_SERVER__PORT, etc.)
            .add_source(
                Environment::with_prefix("UPLINK")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.transfer.chunk_size_bytes == 0 {
            errors.push("chunk_size_bytes must be positive".to_string());
        }

        if self.transfer.inactivity_timeout_secs == 0 {
            errors.push("inactivity_timeout_secs must be positive".to_string());
        }

        if self.server.download_dir.trim().is_empty() {
            errors.push("download_dir must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.transfer.chunk_size_bytes, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.transfer.inactivity_timeout_secs, 30);
        assert!(config.transfer.concurrent_per_agent);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = AppConfig::default();
        config.transfer.chunk_size_bytes = 0;
        config.transfer.inactivity_timeout_secs = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("chunk_size_bytes"));
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = AppConfig::load_from("does/not/exist").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.download_dir, "./downloads");
    }
}
