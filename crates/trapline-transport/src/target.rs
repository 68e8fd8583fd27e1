//! Protocol targets: where a request goes and how it is secured.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use trapline_core::{Result, SnmpProtocolVersion, TransportProtocol};

use crate::usm::UsmUserKey;

/// Socket address plus the underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportAddress {
    pub protocol: TransportProtocol,
    pub addr: SocketAddr,
}

impl TransportAddress {
    /// Resolve `host:port`. IP literals are taken as is, anything else goes
    /// through the runtime's name resolution; failure is a configuration
    /// error.
    pub async fn resolve(protocol: TransportProtocol, host: &str, port: u16) -> Result<Self> {
        let host = host.trim();
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(Self {
                protocol,
                addr: SocketAddr::new(ip, port),
            });
        }
        let invalid =
            || trapline_core::config_err!("Invalid address {}/{}/{}", protocol, host, port);
        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| invalid())?
            .next()
            .ok_or_else(invalid)?;
        Ok(Self { protocol, addr })
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.protocol, self.addr.ip(), self.addr.port())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityLevel {
    NoAuthNoPriv,
    AuthNoPriv,
    AuthPriv,
}

/// Security parameters carried by a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSecurity {
    /// v1/v2c shared secret.
    Community { community: String },
    /// v3 user registered in the USM table.
    User {
        user: UsmUserKey,
        level: SecurityLevel,
    },
}

impl TargetSecurity {
    pub fn level(&self) -> SecurityLevel {
        match self {
            Self::Community { .. } => SecurityLevel::NoAuthNoPriv,
            Self::User { level, .. } => *level,
        }
    }
}

/// Everything the client needs to address and secure an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: TransportAddress,
    pub version: SnmpProtocolVersion,
    pub security: TargetSecurity,
    pub timeout: Duration,
    pub retries: u32,
}

impl Target {
    /// Message version code as sent on the wire.
    pub fn version_code(&self) -> i32 {
        self.version.code()
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security.level()
    }

    pub fn usm_user(&self) -> Option<&UsmUserKey> {
        match &self.security {
            TargetSecurity::User { user, .. } => Some(user),
            TargetSecurity::Community { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let address = TransportAddress::resolve(TransportProtocol::Udp, "127.0.0.1", 1620)
            .await
            .unwrap();
        assert_eq!(address.addr, "127.0.0.1:1620".parse().unwrap());
        assert_eq!(address.to_string(), "udp:127.0.0.1/1620");
    }

    #[tokio::test]
    async fn test_resolve_ipv6_literal() {
        let address = TransportAddress::resolve(TransportProtocol::Tcp, "::1", 161)
            .await
            .unwrap();
        assert!(address.ip().is_loopback());
    }

    #[tokio::test]
    async fn test_resolve_localhost_name() {
        let address = TransportAddress::resolve(TransportProtocol::Udp, "localhost", 161)
            .await
            .unwrap();
        assert!(address.ip().is_loopback());
        assert_eq!(address.addr.port(), 161);
    }

    #[tokio::test]
    async fn test_resolve_invalid_host() {
        let err = TransportAddress::resolve(TransportProtocol::Udp, "not a host!", 161)
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_community_security_level() {
        let security = TargetSecurity::Community {
            community: "public".into(),
        };
        assert_eq!(security.level(), SecurityLevel::NoAuthNoPriv);
    }
}
