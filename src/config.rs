//! Telemetry configuration.
//!
//! Loaded once at startup from environment variables (`LOG_LEVEL`,
//! `ENVIRONMENT`, `FLUSH_INTERVAL_SECS`) or from a TOML file. Components
//! read their settings at construction; there is no hot reload.

use serde::{Deserialize, Serialize};

use crate::error::FaultError;
use crate::logger::LogLevel;

/// Deployment environment. Controls output format (pretty vs JSON lines)
/// and whether the periodic metrics flush runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Telemetry settings shared by the logger, metrics collector, and tracer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Minimum level that gets emitted (default: info).
    #[serde(default)]
    pub log_level: LogLevel,

    /// Deployment environment (default: development).
    #[serde(default)]
    pub environment: Environment,

    /// Seconds between periodic metric flushes in production (default: 60).
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_flush_interval_secs() -> u64 {
    60
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            environment: Environment::default(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl TelemetryConfig {
    /// Load settings from the process environment.
    ///
    /// Never fails: any missing or malformed variable falls back to the
    /// defaults, so the logger is always constructible.
    pub fn from_env() -> Self {
        config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .unwrap_or_default()
    }

    /// Load settings from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, FaultError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| FaultError::new(format!("Invalid telemetry config {}: {}", path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.flush_interval_secs, 60);
        assert!(!config.environment.is_production());
    }

    #[test]
    fn test_from_toml() {
        let config: TelemetryConfig = toml::from_str(
            r#"
            log_level = "warn"
            environment = "production"
            flush_interval_secs = 15
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, LogLevel::Warn);
        assert!(config.environment.is_production());
        assert_eq!(config.flush_interval_secs, 15);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TelemetryConfig = toml::from_str(r#"log_level = "debug""#).unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.flush_interval_secs, 60);
    }

    #[test]
    fn test_from_file_missing_path() {
        let result = TelemetryConfig::from_file("/nonexistent/telemetry.toml");
        assert!(result.is_err());
    }
}
