//! Configuration management
//!
//! Server-level settings load from environment variables (optionally a
//! TOML file); the provider clients carry their own `from_env` configs.
//! Missing provider credentials are not a startup error — they surface as
//! clean per-job failures at call time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gateway server configuration
    pub server: ServerConfig,

    /// Monitor scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Scrape back-end configuration
    pub scrape: ScrapeBackendConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Gateway server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP gateway
    pub bind_address: SocketAddr,
}

/// Monitor scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between monitor scans
    pub tick_secs: u64,

    /// Whether the scheduler runs at all
    pub enabled: bool,
}

/// Scrape back-end configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeBackendConfig {
    /// Requests per second for the simple scraper
    pub simple_rate_limit: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "127.0.0.1:8080".parse().expect("static address"),
            },
            scheduler: SchedulerConfig {
                tick_secs: 300,
                enabled: true,
            },
            scrape: ScrapeBackendConfig {
                simple_rate_limit: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let bind_address = std::env::var("PAGELIFT_BIND")
            .unwrap_or_else(|_| String::from("127.0.0.1:8080"))
            .parse()
            .context("Invalid PAGELIFT_BIND address")?;

        let tick_secs = std::env::var("PAGELIFT_SCHEDULER_TICK_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        let scheduler_enabled = std::env::var("PAGELIFT_SCHEDULER_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(true);

        let simple_rate_limit = std::env::var("PAGELIFT_SIMPLE_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let level = std::env::var("PAGELIFT_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let format = std::env::var("PAGELIFT_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            server: ServerConfig { bind_address },
            scheduler: SchedulerConfig {
                tick_secs,
                enabled: scheduler_enabled,
            },
            scrape: ScrapeBackendConfig { simple_rate_limit },
            logging: LoggingConfig { level, format },
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_secs == 0 {
            anyhow::bail!("scheduler tick_secs must be greater than 0");
        }

        if self.scrape.simple_rate_limit == 0 {
            anyhow::bail!("simple_rate_limit must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.tick_secs, 300);
        assert!(config.scheduler.enabled);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("PAGELIFT_BIND", "0.0.0.0:9999");
        std::env::set_var("PAGELIFT_SCHEDULER_TICK_SECS", "60");

        let config = Config::from_env().unwrap();
        assert_eq!(config.server.bind_address.port(), 9999);
        assert_eq!(config.scheduler.tick_secs, 60);

        std::env::remove_var("PAGELIFT_BIND");
        std::env::remove_var("PAGELIFT_SCHEDULER_TICK_SECS");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_bind() {
        std::env::set_var("PAGELIFT_BIND", "not-an-address");
        assert!(Config::from_env().is_err());
        std::env::remove_var("PAGELIFT_BIND");
    }

    #[test]
    fn test_validate_rejects_zero_tick() {
        let mut config = Config::default();
        config.scheduler.tick_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            [server]
            bind_address = "127.0.0.1:3000"

            [scheduler]
            tick_secs = 120
            enabled = false

            [scrape]
            simple_rate_limit = 2

            [logging]
            level = "debug"
            format = "json"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address.port(), 3000);
        assert!(!config.scheduler.enabled);
        assert_eq!(config.logging.format, "json");
    }
}
