//! Communication configs: what a device profile asks the transport to do.
//!
//! A profile declares one [`CommunicationConfig`] per purpose. Each config
//! lists the [`SnmpMapping`]s that tie platform keys to OIDs and datatypes;
//! configs with a querying frequency are polled on a timer, the others are
//! fired by attribute updates, RPC calls or incoming traps.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::oid::Oid;

/// Declared datatype of a mapped value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    String,
    Long,
    Double,
    Boolean,
    Json,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "STRING"),
            Self::Long => write!(f, "LONG"),
            Self::Double => write!(f, "DOUBLE"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Json => write!(f, "JSON"),
        }
    }
}

/// Protocol method of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SnmpMethod {
    Get,
    Set,
}

impl SnmpMethod {
    /// Read exchanges treat a missing reply as a failure; write exchanges
    /// treat it as success.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Get)
    }
}

impl FromStr for SnmpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "SET" => Ok(Self::Set),
            other => Err(crate::config_err!("Unsupported SNMP method '{}'", other)),
        }
    }
}

impl fmt::Display for SnmpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Set => write!(f, "SET"),
        }
    }
}

/// Purpose of an exchange. Selects the encode, decode and processing
/// behaviour applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommunicationSpec {
    /// Periodic telemetry poll.
    TelemetryQuerying,
    /// Periodic client-side attribute poll.
    ClientAttributesQuerying,
    /// Push of updated shared attributes to the device.
    SharedAttributesSetting,
    /// RPC sent from the platform to the device.
    ToDeviceRpcRequest,
    /// Incoming trap forwarded to the platform as an RPC event.
    ToServerRpcRequest,
}

impl CommunicationSpec {
    pub const ALL: [CommunicationSpec; 5] = [
        Self::TelemetryQuerying,
        Self::ClientAttributesQuerying,
        Self::SharedAttributesSetting,
        Self::ToDeviceRpcRequest,
        Self::ToServerRpcRequest,
    ];

    /// Human-readable tag used when reporting errors.
    pub fn label(&self) -> &'static str {
        match self {
            Self::TelemetryQuerying => "Telemetry querying",
            Self::ClientAttributesQuerying => "Client attributes querying",
            Self::SharedAttributesSetting => "Shared attributes setting",
            Self::ToDeviceRpcRequest => "To-device RPC request",
            Self::ToServerRpcRequest => "To-server RPC request",
        }
    }

    /// Method used when the exchange is issued by the transport itself.
    pub fn method(&self) -> SnmpMethod {
        match self {
            Self::SharedAttributesSetting => SnmpMethod::Set,
            _ => SnmpMethod::Get,
        }
    }

    /// Whether configs of this purpose may carry a querying frequency.
    pub fn is_repeating(&self) -> bool {
        matches!(
            self,
            Self::TelemetryQuerying | Self::ClientAttributesQuerying
        )
    }
}

impl fmt::Display for CommunicationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Link between a platform key, an OID and a datatype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnmpMapping {
    #[serde(with = "crate::oid::serde_oid")]
    pub oid: Oid,
    pub key: String,
    pub data_type: DataType,
}

impl SnmpMapping {
    pub fn new(oid: Oid, key: impl Into<String>, data_type: DataType) -> Self {
        Self {
            oid,
            key: key.into(),
            data_type,
        }
    }
}

/// One purpose-specific exchange declared by a device profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationConfig {
    pub spec: CommunicationSpec,
    #[serde(default)]
    pub mappings: Vec<SnmpMapping>,
    /// Polling frequency; present exactly for recurring queries.
    #[serde(default)]
    pub querying_frequency_ms: Option<u64>,
}

impl CommunicationConfig {
    pub fn new(spec: CommunicationSpec) -> Self {
        Self {
            spec,
            mappings: Vec::new(),
            querying_frequency_ms: None,
        }
    }

    pub fn with_mapping(mut self, mapping: SnmpMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn with_querying_frequency(mut self, frequency_ms: u64) -> Self {
        self.querying_frequency_ms = Some(frequency_ms);
        self
    }

    pub fn method(&self) -> SnmpMethod {
        self.spec.method()
    }

    pub fn mapping_for_key(&self, key: &str) -> Option<&SnmpMapping> {
        self.mappings.iter().find(|m| m.key == key)
    }

    pub fn mapping_for_oid(&self, oid: &Oid) -> Option<&SnmpMapping> {
        self.mappings.iter().find(|m| &m.oid == oid)
    }

    /// Whether this config is eligible for recurring scheduling.
    pub fn is_repeating(&self) -> bool {
        self.querying_frequency_ms.is_some()
    }
}

fn default_timeout_ms() -> u64 {
    500
}

/// Transport section of a device profile, shared by every device of the
/// profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfileTransportConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub communication_configs: Vec<CommunicationConfig>,
}

impl Default for DeviceProfileTransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retries: 0,
            communication_configs: Vec::new(),
        }
    }
}

impl DeviceProfileTransportConfig {
    pub fn with_config(mut self, config: CommunicationConfig) -> Self {
        self.communication_configs.push(config);
        self
    }

    pub fn config_for(&self, spec: CommunicationSpec) -> Option<&CommunicationConfig> {
        self.communication_configs.iter().find(|c| c.spec == spec)
    }

    pub fn repeating_configs(&self) -> impl Iterator<Item = &CommunicationConfig> {
        self.communication_configs.iter().filter(|c| c.is_repeating())
    }

    /// Reject profiles the transport cannot run.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for config in &self.communication_configs {
            if !seen.insert(config.spec) {
                return Err(crate::config_err!(
                    "Duplicate communication config for '{}'",
                    config.spec
                ));
            }
            if let Some(frequency) = config.querying_frequency_ms {
                if !config.spec.is_repeating() {
                    return Err(crate::config_err!(
                        "'{}' does not support a querying frequency",
                        config.spec
                    ));
                }
                if frequency == 0 {
                    return Err(crate::config_err!(
                        "Querying frequency of '{}' must be positive",
                        config.spec
                    ));
                }
            }
            if config.mappings.iter().any(|m| m.key.trim().is_empty()) {
                return Err(crate::config_err!(
                    "Mapping with empty key in '{}'",
                    config.spec
                ));
            }
        }
        Ok(())
    }
}
