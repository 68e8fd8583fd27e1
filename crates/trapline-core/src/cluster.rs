//! Cluster membership as observed by a transport instance.

use serde::{Deserialize, Serialize};

/// Capability advertised by instances that run the SNMP transport.
pub const SNMP_TRANSPORT_NAME: &str = "SNMP";

/// One service instance in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub service_id: String,
    #[serde(default)]
    pub transports: Vec<String>,
}

impl ServiceInfo {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            transports: Vec::new(),
        }
    }

    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transports.push(transport.into());
        self
    }

    /// Shorthand for an instance running the SNMP transport.
    pub fn snmp(service_id: impl Into<String>) -> Self {
        Self::new(service_id).with_transport(SNMP_TRANSPORT_NAME)
    }

    pub fn supports(&self, transport: &str) -> bool {
        self.transports.iter().any(|t| t == transport)
    }
}

/// Membership change notification from service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceListChangedEvent {
    /// The service that joined or left; `None` for a full refresh.
    #[serde(default)]
    pub changed_service: Option<ServiceInfo>,
    /// Every known service. May or may not include this instance.
    pub services: Vec<ServiceInfo>,
    pub current_service: ServiceInfo,
}

impl ServiceListChangedEvent {
    /// Whether the event can affect SNMP partitioning.
    pub fn concerns(&self, transport: &str) -> bool {
        self.changed_service
            .as_ref()
            .map_or(true, |service| service.supports(transport))
    }
}
