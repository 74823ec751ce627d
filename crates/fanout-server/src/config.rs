//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (FANOUT_HOST, FANOUT_PORT)
//! - Command line arguments (see `main.rs`)

use anyhow::{Context, Result};
use fanout_core::{OverflowPolicy, RegistryConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default config file locations, searched in order.
const CONFIG_PATHS: [&str; 3] = [
    "fanout.toml",
    "/etc/fanout/fanout.toml",
    "~/.config/fanout/fanout.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Broadcast registry configuration.
    #[serde(default)]
    pub registry: RegistrySection,

    /// Request limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Server-sent events configuration.
    #[serde(default)]
    pub sse: SseConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Broadcast registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    /// Messages buffered per subscriber.
    #[serde(default = "default_endpoint_capacity")]
    pub endpoint_capacity: usize,

    /// What to do when a subscriber's buffer is full.
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Discard topics once their last subscriber is gone.
    #[serde(default = "default_true")]
    pub prune_empty_topics: bool,

    /// Reaper interval in milliseconds. Zero disables the reaper.
    #[serde(default = "default_reap_interval")]
    pub reap_interval_ms: u64,
}

/// Request limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Server-sent events configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    /// Keep-alive comment interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions

// Loopback unless FANOUT_HOST, `--host` or `host` say otherwise.
fn default_host() -> String {
    std::env::var("FANOUT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("FANOUT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_endpoint_capacity() -> usize {
    fanout_core::registry::DEFAULT_ENDPOINT_CAPACITY
}

fn default_reap_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_keep_alive() -> u64 {
    15
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            registry: RegistrySection::default(),
            limits: LimitsConfig::default(),
            sse: SseConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            endpoint_capacity: default_endpoint_capacity(),
            overflow: OverflowPolicy::default(),
            prune_empty_topics: true,
            reap_interval_ms: default_reap_interval(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default location
    /// that exists, or fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// an explicit `path` cannot be read.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check the configuration for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.registry_config()
            .validate()
            .context("Invalid [registry] section")?;
        anyhow::ensure!(
            self.sse.keep_alive_secs > 0,
            "Invalid [sse] section: keep_alive_secs must be greater than zero"
        );
        self.bind_addr()?;
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Registry settings for the core.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            endpoint_capacity: self.registry.endpoint_capacity,
            overflow: self.registry.overflow,
            prune_empty_topics: self.registry.prune_empty_topics,
        }
    }

    /// Reaper interval, or `None` when disabled.
    #[must_use]
    pub fn reap_interval(&self) -> Option<Duration> {
        match self.registry.reap_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        if std::env::var("FANOUT_HOST").is_err() {
            assert_eq!(config.host, "127.0.0.1");
        }
        assert_eq!(config.port, 8080);
        assert_eq!(config.registry.endpoint_capacity, 256);
        assert_eq!(config.registry.overflow, OverflowPolicy::DropNewest);
        assert!(config.registry.prune_empty_topics);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_invalid_bind_addr() {
        let config = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [registry]
            endpoint_capacity = 16
            overflow = "disconnect"
            reap_interval_ms = 0

            [limits]
            max_message_size = 1024
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_message_size, 1024);
        assert_eq!(config.sse.keep_alive_secs, 15);
        assert!(config.reap_interval().is_none());

        let registry = config.registry_config();
        assert_eq!(registry.endpoint_capacity, 16);
        assert_eq!(registry.overflow, OverflowPolicy::Disconnect);
        assert!(registry.prune_empty_topics);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let toml_str = r#"
            [registry]
            endpoint_capacity = 0
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_keep_alive_rejected() {
        let toml_str = r#"
            [sse]
            keep_alive_secs = 0
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("keep_alive_secs"));
    }

    #[test]
    fn test_config_from_file() {
        let path = std::env::temp_dir().join(format!("fanout-test-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 7001\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.port, 7001);

        std::fs::remove_file(&path).unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
