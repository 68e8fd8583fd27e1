//! Device identities and per-device transport configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::communication::DeviceProfileTransportConfig;
use crate::error::{Error, Result};

/// Unique identifier for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SNMP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SnmpProtocolVersion {
    V1,
    V2c,
    V3,
}

impl SnmpProtocolVersion {
    /// Version code carried in the message header.
    pub fn code(&self) -> i32 {
        match self {
            Self::V1 => 0,
            Self::V2c => 1,
            Self::V3 => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "V1",
            Self::V2c => "V2C",
            Self::V3 => "V3",
        }
    }
}

impl FromStr for SnmpProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "V1" => Ok(Self::V1),
            "V2C" => Ok(Self::V2c),
            "V3" => Ok(Self::V3),
            other => Err(crate::config_err!(
                "SNMP protocol version {} is not supported",
                other
            )),
        }
    }
}

impl TryFrom<String> for SnmpProtocolVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SnmpProtocolVersion> for String {
    fn from(value: SnmpProtocolVersion) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SnmpProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// USM authentication protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AuthenticationProtocol {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl AuthenticationProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA_1",
            Self::Sha224 => "SHA_224",
            Self::Sha256 => "SHA_256",
            Self::Sha384 => "SHA_384",
            Self::Sha512 => "SHA_512",
        }
    }

    /// Digest length in bytes, which is also the localized key length.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

impl FromStr for AuthenticationProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA" | "SHA1" | "SHA_1" => Ok(Self::Sha1),
            "SHA_224" | "SHA224" => Ok(Self::Sha224),
            "SHA_256" | "SHA256" => Ok(Self::Sha256),
            "SHA_384" | "SHA384" => Ok(Self::Sha384),
            "SHA_512" | "SHA512" => Ok(Self::Sha512),
            other => Err(crate::config_err!(
                "Authentication protocol {} is not supported",
                other
            )),
        }
    }
}

impl TryFrom<String> for AuthenticationProtocol {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AuthenticationProtocol> for String {
    fn from(value: AuthenticationProtocol) -> Self {
        value.as_str().to_string()
    }
}

/// USM privacy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PrivacyProtocol {
    Des,
    Aes128,
    Aes192,
    Aes256,
}

impl PrivacyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Des => "DES",
            Self::Aes128 => "AES_128",
            Self::Aes192 => "AES_192",
            Self::Aes256 => "AES_256",
        }
    }
}

impl FromStr for PrivacyProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "DES" => Ok(Self::Des),
            "AES" | "AES_128" | "AES128" => Ok(Self::Aes128),
            "AES_192" | "AES192" => Ok(Self::Aes192),
            "AES_256" | "AES256" => Ok(Self::Aes256),
            other => Err(crate::config_err!(
                "Privacy protocol {} is not supported",
                other
            )),
        }
    }
}

impl TryFrom<String> for PrivacyProtocol {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PrivacyProtocol> for String {
    fn from(value: PrivacyProtocol) -> Self {
        value.as_str().to_string()
    }
}

fn default_port() -> u16 {
    161
}

/// Transport section of a device: where it lives and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTransportConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub protocol_version: SnmpProtocolVersion,

    /// v1/v2c shared secret.
    #[serde(default)]
    pub community: Option<String>,

    // v3 (USM) parameters
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub security_name: Option<String>,
    #[serde(default)]
    pub context_name: Option<String>,
    #[serde(default)]
    pub engine_id: Option<String>,
    #[serde(default)]
    pub authentication_protocol: Option<AuthenticationProtocol>,
    #[serde(default)]
    pub authentication_passphrase: Option<String>,
    #[serde(default)]
    pub privacy_protocol: Option<PrivacyProtocol>,
    #[serde(default)]
    pub privacy_passphrase: Option<String>,
}

impl DeviceTransportConfig {
    /// Community-based (v1/v2c) device.
    pub fn community(
        host: impl Into<String>,
        port: u16,
        version: SnmpProtocolVersion,
        community: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            protocol_version: version,
            community: Some(community.into()),
            username: None,
            security_name: None,
            context_name: None,
            engine_id: None,
            authentication_protocol: None,
            authentication_passphrase: None,
            privacy_protocol: None,
            privacy_passphrase: None,
        }
    }
}

/// Device credentials as stored by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceCredentials {
    AccessToken { token: String },
    X509Certificate { hash: String },
    MqttBasic { client_id: Option<String>, username: Option<String> },
}

impl DeviceCredentials {
    pub fn is_access_token(&self) -> bool {
        matches!(self, Self::AccessToken { .. })
    }
}

/// A device managed by the SNMP transport, with its resolved profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnmpDevice {
    pub id: DeviceId,
    pub tenant_id: TenantId,
    pub name: String,
    pub device_type: String,
    pub profile: DeviceProfileTransportConfig,
    pub transport: DeviceTransportConfig,
}

/// Identity of a live device session as seen by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub device_name: String,
    pub device_type: String,
}

impl SessionInfo {
    pub fn for_device(device: &SnmpDevice) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tenant_id: device.tenant_id,
            device_id: device.id,
            device_name: device.name.clone(),
            device_type: device.device_type.clone(),
        }
    }
}

/// RPC call from the platform to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToDeviceRpcRequest {
    pub request_id: i32,
    pub method_name: String,
    /// JSON object carrying `key` and optionally `value`.
    pub params: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_codes() {
        assert_eq!(SnmpProtocolVersion::V1.code(), 0);
        assert_eq!(SnmpProtocolVersion::V2c.code(), 1);
        assert_eq!(SnmpProtocolVersion::V3.code(), 3);
    }

    #[test]
    fn test_unsupported_protocol_version() {
        let err = "V4".parse::<SnmpProtocolVersion>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: SNMP protocol version V4 is not supported"
        );
    }

    #[test]
    fn test_device_config_deserialization() {
        let json = r#"{
            "host": "10.0.0.7",
            "protocolVersion": "V3",
            "username": "monitor",
            "securityName": "monitor",
            "engineId": "engine-7",
            "authenticationProtocol": "SHA_256",
            "authenticationPassphrase": "authpass123",
            "privacyProtocol": "AES_128",
            "privacyPassphrase": "privpass123"
        }"#;
        let config: DeviceTransportConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 161);
        assert_eq!(config.protocol_version, SnmpProtocolVersion::V3);
        assert_eq!(config.authentication_protocol, Some(AuthenticationProtocol::Sha256));
        assert_eq!(config.privacy_protocol, Some(PrivacyProtocol::Aes128));
    }

    #[test]
    fn test_unknown_protocol_rejected_at_deserialization() {
        let json = r#"{"host": "10.0.0.7", "protocolVersion": "V9"}"#;
        let err = serde_json::from_str::<DeviceTransportConfig>(json).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_protocol_aliases() {
        assert_eq!("sha".parse::<AuthenticationProtocol>().unwrap(), AuthenticationProtocol::Sha1);
        assert_eq!("SHA-512".parse::<AuthenticationProtocol>().unwrap(), AuthenticationProtocol::Sha512);
        assert_eq!("aes".parse::<PrivacyProtocol>().unwrap(), PrivacyProtocol::Aes128);
        assert!("3DES".parse::<PrivacyProtocol>().is_err());
    }

    #[test]
    fn test_credentials_tagging() {
        let creds: DeviceCredentials =
            serde_json::from_str(r#"{"type": "ACCESS_TOKEN", "token": "abc"}"#).unwrap();
        assert!(creds.is_access_token());
    }
}
