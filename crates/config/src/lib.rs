//! Configuration loading, validation, and management for Ledgerline.
//!
//! Loads configuration from `ledgerline.toml` (path overridable via
//! `LEDGERLINE_CONFIG`) with environment variable overrides. Validates all
//! settings at load time. There is no global config state: callers load an
//! [`ObserverConfig`] and pass the pieces to the components that need them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// The root configuration structure.
///
/// Maps directly to `ledgerline.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Lifecycle event emission settings.
    #[serde(default)]
    pub events: EventsConfig,

    /// Anomaly alert thresholds.
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Trace storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Custom pricing overrides (`"provider/model"` → rates per 1k tokens).
    #[serde(default)]
    pub pricing: HashMap<String, PricingOverride>,
}

/// Lifecycle event emission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Whether lifecycle events are emitted at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Anomaly alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Spans slower than this many milliseconds raise a slow-request signal.
    #[serde(default = "default_slow_request_ms")]
    pub slow_request_ms: u64,

    /// Spans costing more than this many USD raise a high-cost signal.
    #[serde(default = "default_cost_alert_usd")]
    pub cost_alert_usd: f64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            slow_request_ms: default_slow_request_ms(),
            cost_alert_usd: default_cost_alert_usd(),
        }
    }
}

/// Trace storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// A pricing override for one `provider/model` pair, per 1k tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverride {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    #[serde(default)]
    pub cache_read_per_1k: f64,
    #[serde(default)]
    pub cache_creation_per_1k: f64,
}

fn default_true() -> bool {
    true
}
fn default_slow_request_ms() -> u64 {
    5000
}
fn default_cost_alert_usd() -> f64 {
    0.1
}
fn default_db_path() -> String {
    "ledgerline.db".into()
}

impl ObserverConfig {
    /// Load configuration with the standard layering:
    /// file (if present) → environment overrides → validation.
    ///
    /// The file path comes from `LEDGERLINE_CONFIG`, defaulting to
    /// `ledgerline.toml` in the working directory. A missing file is not an
    /// error; defaults apply.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("LEDGERLINE_CONFIG").unwrap_or_else(|_| "ledgerline.toml".into());
        let mut config = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            debug!(path, "no config file; using defaults");
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a specific TOML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `LEDGERLINE_*` environment overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var("LEDGERLINE_DB") {
            self.storage.path = path;
        }
        if let Ok(ms) = std::env::var("LEDGERLINE_SLOW_MS") {
            self.alerts.slow_request_ms = ms.parse().map_err(|_| {
                ConfigError::Invalid(format!("LEDGERLINE_SLOW_MS is not a number: {ms}"))
            })?;
        }
        if let Ok(usd) = std::env::var("LEDGERLINE_COST_ALERT") {
            self.alerts.cost_alert_usd = usd.parse().map_err(|_| {
                ConfigError::Invalid(format!("LEDGERLINE_COST_ALERT is not a number: {usd}"))
            })?;
        }
        if let Ok(enabled) = std::env::var("LEDGERLINE_EVENTS") {
            self.events.enabled = matches!(enabled.as_str(), "1" | "true" | "on");
        }
        Ok(())
    }

    /// Reject values that would silently disable or distort monitoring.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alerts.slow_request_ms == 0 {
            return Err(ConfigError::Invalid(
                "alerts.slow_request_ms must be greater than 0".into(),
            ));
        }
        if self.alerts.cost_alert_usd < 0.0 {
            return Err(ConfigError::Invalid(
                "alerts.cost_alert_usd must not be negative".into(),
            ));
        }
        if self.storage.path.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.path must not be empty".into()));
        }
        for (key, rate) in &self.pricing {
            if !key.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "pricing key '{key}' must be 'provider/model'"
                )));
            }
            if rate.input_per_1k < 0.0
                || rate.output_per_1k < 0.0
                || rate.cache_read_per_1k < 0.0
                || rate.cache_creation_per_1k < 0.0
            {
                return Err(ConfigError::Invalid(format!(
                    "pricing for '{key}' has a negative rate"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = ObserverConfig::default();
        assert!(config.events.enabled);
        assert_eq!(config.alerts.slow_request_ms, 5000);
        assert!((config.alerts.cost_alert_usd - 0.1).abs() < 1e-12);
        assert_eq!(config.storage.path, "ledgerline.db");
        assert!(config.pricing.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_full_toml() {
        let text = r#"
            [events]
            enabled = false

            [alerts]
            slow_request_ms = 2500
            cost_alert_usd = 0.05

            [storage]
            path = "/var/lib/ledgerline/traces.db"

            [pricing."acme/frontier-1"]
            input_per_1k = 0.002
            output_per_1k = 0.008
            cache_read_per_1k = 0.0002
        "#;
        let config: ObserverConfig = toml::from_str(text).unwrap();
        assert!(!config.events.enabled);
        assert_eq!(config.alerts.slow_request_ms, 2500);
        assert_eq!(config.storage.path, "/var/lib/ledgerline/traces.db");
        let rate = &config.pricing["acme/frontier-1"];
        assert!((rate.output_per_1k - 0.008).abs() < 1e-12);
        assert_eq!(rate.cache_creation_per_1k, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: ObserverConfig = toml::from_str("[alerts]\nslow_request_ms = 100\n").unwrap();
        assert_eq!(config.alerts.slow_request_ms, 100);
        assert!((config.alerts.cost_alert_usd - 0.1).abs() < 1e-12);
        assert!(config.events.enabled);
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[alerts]\ncost_alert_usd = 1.5").unwrap();
        let config = ObserverConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert!((config.alerts.cost_alert_usd - 1.5).abs() < 1e-12);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = ObserverConfig::from_file("/nonexistent/ledgerline.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn zero_slow_threshold_is_rejected() {
        let mut config = ObserverConfig::default();
        config.alerts.slow_request_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn negative_cost_threshold_is_rejected() {
        let mut config = ObserverConfig::default();
        config.alerts.cost_alert_usd = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_pricing_key_is_rejected() {
        let mut config = ObserverConfig::default();
        config.pricing.insert(
            "frontier-1".into(),
            PricingOverride {
                input_per_1k: 0.001,
                output_per_1k: 0.002,
                cache_read_per_1k: 0.0,
                cache_creation_per_1k: 0.0,
            },
        );
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn negative_pricing_rate_is_rejected() {
        let mut config = ObserverConfig::default();
        config.pricing.insert(
            "acme/frontier-1".into(),
            PricingOverride {
                input_per_1k: -0.001,
                output_per_1k: 0.002,
                cache_read_per_1k: 0.0,
                cache_creation_per_1k: 0.0,
            },
        );
        assert!(config.validate().is_err());
    }
}
