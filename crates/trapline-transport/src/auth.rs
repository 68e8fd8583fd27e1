//! Target construction and per-device security contexts.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use trapline_core::{
    config_err, DeviceProfileTransportConfig, DeviceTransportConfig, Result, SnmpProtocolVersion,
    TransportProtocol,
};

use crate::session::DeviceSession;
use crate::target::{SecurityLevel, Target, TargetSecurity, TransportAddress};
use crate::usm::{UsmUser, UsmUserTable};

/// Builds targets for devices and owns their USM registrations.
pub struct SnmpAuthService {
    usm: Arc<UsmUserTable>,
    transport: TransportProtocol,
}

impl SnmpAuthService {
    pub fn new(usm: Arc<UsmUserTable>, transport: TransportProtocol) -> Self {
        Self { usm, transport }
    }

    pub fn usm(&self) -> &Arc<UsmUserTable> {
        &self.usm
    }

    /// Build the target for a device. v3 devices get their USM user
    /// derived and registered, replacing any earlier registration.
    pub async fn build_target(
        &self,
        profile: &DeviceProfileTransportConfig,
        device: &DeviceTransportConfig,
    ) -> Result<Target> {
        let address =
            TransportAddress::resolve(self.transport, &device.host, device.port).await?;
        let security = match device.protocol_version {
            SnmpProtocolVersion::V1 | SnmpProtocolVersion::V2c => {
                let community = device.community.clone().ok_or_else(|| {
                    config_err!(
                        "Community is required for {} devices",
                        device.protocol_version
                    )
                })?;
                TargetSecurity::Community { community }
            }
            SnmpProtocolVersion::V3 => {
                let user = build_usm_user(device)?;
                let key = user.key();
                if self.usm.upsert(user).is_some() {
                    debug!(security_name = %key.security_name, "Replaced USM user");
                }
                TargetSecurity::User {
                    user: key,
                    level: SecurityLevel::AuthPriv,
                }
            }
        };

        info!(
            address = %address,
            version = %device.protocol_version,
            "Built SNMP target"
        );

        Ok(Target {
            address,
            version: device.protocol_version,
            security,
            timeout: Duration::from_millis(profile.timeout_ms),
            retries: profile.retries,
        })
    }

    /// Drop the session's USM user, if it has one.
    pub fn release_security_context(&self, session: &DeviceSession) {
        if let Some(key) = session.target().usm_user() {
            if self.usm.remove(key).is_some() {
                debug!(
                    device_id = %session.device_id(),
                    security_name = %key.security_name,
                    "Released USM user"
                );
            }
        }
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| config_err!("{} is required for SNMP v3 devices", name))
}

fn build_usm_user(device: &DeviceTransportConfig) -> Result<UsmUser> {
    let security_name = device
        .security_name
        .as_deref()
        .or(device.username.as_deref())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| config_err!("Username is required for SNMP v3 devices"))?;
    let engine_id = required(&device.engine_id, "Engine id")?;
    let auth_protocol = device
        .authentication_protocol
        .ok_or_else(|| config_err!("Authentication protocol is required for SNMP v3 devices"))?;
    let privacy_protocol = device
        .privacy_protocol
        .ok_or_else(|| config_err!("Privacy protocol is required for SNMP v3 devices"))?;

    UsmUser::derive(
        security_name,
        engine_id.as_bytes().to_vec(),
        auth_protocol,
        required(&device.authentication_passphrase, "Authentication passphrase")?,
        privacy_protocol,
        required(&device.privacy_passphrase, "Privacy passphrase")?,
    )
}
