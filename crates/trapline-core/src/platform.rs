//! Interfaces of the platform collaborators the transport talks to.
//!
//! The transport never owns device storage or the ingestion pipeline; it
//! reaches them through these traits, injected at construction time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::{DeviceCredentials, DeviceId, SessionInfo, SnmpDevice, TenantId};
use crate::error::{Error, Result};

/// Flat key/value map of decoded results.
pub type ResponseData = serde_json::Map<String, serde_json::Value>;

/// One page of devices bound to the SNMP transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePage {
    pub devices: Vec<DeviceId>,
    pub has_next: bool,
}

/// Device and credential lookups.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Device with its resolved profile, or `None` if it does not exist
    /// or is not configured for SNMP.
    async fn get_device(&self, device_id: DeviceId) -> Result<Option<SnmpDevice>>;

    async fn get_device_credentials(&self, device_id: DeviceId) -> Result<Option<DeviceCredentials>>;

    /// Devices using the SNMP transport, zero-based pages.
    async fn list_devices_for_this_transport(&self, page: usize, page_size: usize) -> Result<DevicePage>;
}

/// Downstream ingestion API of the platform.
#[async_trait]
pub trait TransportService: Send + Sync {
    async fn submit_telemetry(&self, session: &SessionInfo, values: ResponseData) -> Result<()>;

    async fn submit_attributes(&self, session: &SessionInfo, values: ResponseData) -> Result<()>;

    async fn submit_rpc_response(&self, session: &SessionInfo, request_id: i32, payload: String) -> Result<()>;

    async fn submit_server_rpc_event(
        &self,
        session: &SessionInfo,
        method_name: &str,
        payload: String,
    ) -> Result<()>;

    /// Liveness update for the session. Fire-and-forget.
    fn report_activity(&self, session: &SessionInfo);

    /// Per-tenant, per-device, per-purpose error event. Fire-and-forget.
    fn report_error(&self, tenant_id: TenantId, device_id: DeviceId, purpose: &str, error: &Error);
}
