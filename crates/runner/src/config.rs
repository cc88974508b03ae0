//! Bridge configuration
//!
//! One JSON document covers both processes. Every field has a default, so an
//! empty object (or no file at all) yields a working setup.

use bridge_gateway::PipeConfig;
use bridge_order_manager::{OrderManagerConfig, ThrottleConfig};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Path of the config file, when set
pub const CONFIG_ENV: &str = "BRIDGE_CONFIG";
/// Overrides `pipe.pipe_name`
pub const PIPE_ENV: &str = "BRIDGE_PIPE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub pipe: PipeConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub orders: OrderManagerConfig,
}

/// Load configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BridgeConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<BridgeConfig, ConfigError> {
    let config: BridgeConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

/// Load from `BRIDGE_CONFIG` (or defaults) and apply `BRIDGE_PIPE`
pub fn load_from_env() -> Result<BridgeConfig, ConfigError> {
    let mut config = match std::env::var(CONFIG_ENV) {
        Ok(path) => {
            info!("Loading configuration from: {}", path);
            load_config(path)?
        }
        Err(_) => {
            info!("Using default configuration");
            BridgeConfig::default()
        }
    };
    if let Ok(pipe) = std::env::var(PIPE_ENV) {
        config.pipe.pipe_name = pipe;
    }
    config.validate()?;
    Ok(config)
}

impl BridgeConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipe
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.throttle.capacity_per_second == 0 {
            return Err(ConfigError::Invalid(
                "throttle.capacity_per_second must be positive".into(),
            ));
        }
        if self.throttle.window_ms == 0 {
            return Err(ConfigError::Invalid("throttle.window_ms must be positive".into()));
        }
        if self.orders.update_capacity == 0 {
            return Err(ConfigError::Invalid(
                "orders.update_capacity must be positive".into(),
            ));
        }
        if self.orders.client_id_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "orders.client_id_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = load_config_from_str("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.pipe.pipe_name, "TradingBridge");
        assert_eq!(config.pipe.max_connections, 4);
        assert_eq!(config.throttle.capacity_per_second, 4);
        assert_eq!(config.orders.client_id_prefix, "ORD");
    }

    #[test]
    fn test_partial_override() {
        let config = load_config_from_str(
            r#"{"pipe": {"pipe_name": "Kiwoom", "request_timeout_ms": 2500},
                "throttle": {"capacity_per_second": 3}}"#,
        )
        .unwrap();
        assert_eq!(config.pipe.pipe_name, "Kiwoom");
        assert_eq!(config.pipe.request_timeout_ms, 2500);
        assert_eq!(config.pipe.push_capacity, 4096);
        assert_eq!(config.throttle.capacity_per_second, 3);
        assert_eq!(config.throttle.acquire_timeout_ms, 5000);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = load_config_from_str(r#"{"throttle": {"capacity_per_second": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = load_config_from_str(r#"{"pipe": {"max_connections": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = load_config_from_str(r#"{"pipe": {"max_payload": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            load_config_from_str("{not json"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("bridge-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"orders": {"client_id_prefix": "UI"}}"#).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.orders.client_id_prefix, "UI");
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::IoError(_))));
    }
}
