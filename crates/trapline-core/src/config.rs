//! Transport configuration.
//!
//! Loaded from TOML, then overridden from environment variables:
//!
//! ```toml
//! max_request_oids = 100
//! ignore_type_cast_errors = false
//!
//! [socket]
//! bind_port = 1620
//! transport = "udp"
//!
//! [response_processing]
//! parallelism_level = 20
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Environment variable names.
pub mod env_vars {
    pub const BIND_PORT: &str = "SNMP_BIND_PORT";
    pub const UNDERLYING_PROTOCOL: &str = "SNMP_UNDERLYING_PROTOCOL";
    pub const MAX_REQUEST_OIDS: &str = "SNMP_MAX_REQUEST_OIDS";
    pub const RESPONSE_PROCESSING_PARALLELISM_LEVEL: &str =
        "SNMP_RESPONSE_PROCESSING_PARALLELISM_LEVEL";
    pub const IGNORE_TYPE_CAST_ERRORS: &str = "SNMP_RESPONSE_IGNORE_TYPE_CAST_ERRORS";
    pub const LOG_JSON: &str = "TRAPLINE_LOG_JSON";
}

/// Default values.
pub mod defaults {
    pub const BIND_PORT: u16 = 1620;
    pub const MAX_REQUEST_OIDS: usize = 100;
    pub const RESPONSE_PROCESSING_PARALLELISM_LEVEL: usize = 20;
    pub const DEVICE_PAGE_SIZE: usize = 1000;
    pub const LOG_LEVEL: &str = "info";
}

/// Underlying transport of the protocol socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    #[default]
    Udp,
    Tcp,
}

impl FromStr for TransportProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            other => Err(crate::config_err!(
                "Underlying protocol '{}' is not supported",
                other
            )),
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

fn default_bind_port() -> u16 {
    defaults::BIND_PORT
}

/// Protocol socket settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    #[serde(default)]
    pub transport: TransportProtocol,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            bind_port: default_bind_port(),
            transport: TransportProtocol::default(),
        }
    }
}

fn default_parallelism_level() -> usize {
    defaults::RESPONSE_PROCESSING_PARALLELISM_LEVEL
}

/// Response decoding/dispatch pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseProcessingConfig {
    #[serde(default = "default_parallelism_level")]
    pub parallelism_level: usize,
}

impl Default for ResponseProcessingConfig {
    fn default() -> Self {
        Self {
            parallelism_level: default_parallelism_level(),
        }
    }
}

fn default_log_level() -> String {
    defaults::LOG_LEVEL.to_string()
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_max_request_oids() -> usize {
    defaults::MAX_REQUEST_OIDS
}

fn default_device_page_size() -> usize {
    defaults::DEVICE_PAGE_SIZE
}

/// Top-level transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub socket: SocketConfig,
    /// Maximum number of variable bindings per PDU.
    #[serde(default = "default_max_request_oids")]
    pub max_request_oids: usize,
    #[serde(default)]
    pub response_processing: ResponseProcessingConfig,
    /// Concurrent recurring queries; defaults to available CPU parallelism.
    #[serde(default)]
    pub querying_parallelism: Option<usize>,
    /// Drop values that fail to cast instead of failing the exchange.
    #[serde(default)]
    pub ignore_type_cast_errors: bool,
    /// Page size used when listing devices at startup and on rebalance.
    #[serde(default = "default_device_page_size")]
    pub device_page_size: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket: SocketConfig::default(),
            max_request_oids: default_max_request_oids(),
            response_processing: ResponseProcessingConfig::default(),
            querying_parallelism: None,
            ignore_type_cast_errors: false,
            device_page_size: default_device_page_size(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        info!(category = "config", "Loading config from: {}", path.display());
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(env_vars::BIND_PORT) {
            self.socket.bind_port = parse_var(env_vars::BIND_PORT, &port)?;
        }
        if let Some(protocol) = lookup(env_vars::UNDERLYING_PROTOCOL) {
            self.socket.transport = protocol.parse()?;
        }
        if let Some(max) = lookup(env_vars::MAX_REQUEST_OIDS) {
            self.max_request_oids = parse_var(env_vars::MAX_REQUEST_OIDS, &max)?;
        }
        if let Some(level) = lookup(env_vars::RESPONSE_PROCESSING_PARALLELISM_LEVEL) {
            self.response_processing.parallelism_level =
                parse_var(env_vars::RESPONSE_PROCESSING_PARALLELISM_LEVEL, &level)?;
        }
        if let Some(ignore) = lookup(env_vars::IGNORE_TYPE_CAST_ERRORS) {
            self.ignore_type_cast_errors = parse_var(env_vars::IGNORE_TYPE_CAST_ERRORS, &ignore)?;
        }
        if let Some(json) = lookup(env_vars::LOG_JSON) {
            self.logging.json = parse_var(env_vars::LOG_JSON, &json)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_request_oids == 0 {
            return Err(crate::config_err!("max_request_oids must be positive"));
        }
        if self.response_processing.parallelism_level == 0 {
            return Err(crate::config_err!(
                "response_processing.parallelism_level must be positive"
            ));
        }
        if self.querying_parallelism == Some(0) {
            return Err(crate::config_err!("querying_parallelism must be positive"));
        }
        if self.device_page_size == 0 {
            return Err(crate::config_err!("device_page_size must be positive"));
        }
        Ok(())
    }

    /// Concurrency of the recurring-query scheduler.
    pub fn querying_parallelism(&self) -> usize {
        self.querying_parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| crate::config_err!("Invalid value '{}' for {}", value, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.socket.bind_port, 1620);
        assert_eq!(config.socket.transport, TransportProtocol::Udp);
        assert_eq!(config.max_request_oids, 100);
        assert_eq!(config.response_processing.parallelism_level, 20);
        assert!(!config.ignore_type_cast_errors);
        assert!(config.querying_parallelism() >= 1);
    }

    #[test]
    fn test_from_toml() {
        let config = TransportConfig::from_toml_str(
            r#"
            max_request_oids = 50
            ignore_type_cast_errors = true

            [socket]
            bind_port = 1161
            transport = "tcp"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_request_oids, 50);
        assert!(config.ignore_type_cast_errors);
        assert_eq!(config.socket.bind_port, 1161);
        assert_eq!(config.socket.transport, TransportProtocol::Tcp);
        assert_eq!(config.device_page_size, 1000);
    }

    #[test]
    fn test_from_toml_rejects_zero_batch() {
        let err = TransportConfig::from_toml_str("max_request_oids = 0").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (env_vars::BIND_PORT, "2162"),
            (env_vars::UNDERLYING_PROTOCOL, "TCP"),
            (env_vars::IGNORE_TYPE_CAST_ERRORS, "true"),
        ]
        .into_iter()
        .collect();
        let mut config = TransportConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.socket.bind_port, 2162);
        assert_eq!(config.socket.transport, TransportProtocol::Tcp);
        assert!(config.ignore_type_cast_errors);
    }

    #[test]
    fn test_invalid_override() {
        let mut config = TransportConfig::default();
        let err = config
            .apply_overrides(|name| (name == env_vars::MAX_REQUEST_OIDS).then(|| "lots".to_string()))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid value 'lots' for SNMP_MAX_REQUEST_OIDS"
        );
    }

    #[test]
    fn test_unsupported_underlying_protocol() {
        assert!("sctp".parse::<TransportProtocol>().is_err());
    }
}
