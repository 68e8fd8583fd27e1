//! Core types for the Trapline SNMP transport.
//!
//! This crate holds everything the transport engine shares with the rest
//! of the platform:
//! - **Data model**: device identities, per-device and per-profile
//!   transport configuration, communication configs and mappings
//! - **Errors**: the unified [`Error`] taxonomy
//! - **Configuration**: TOML + environment loading of [`TransportConfig`]
//! - **Logging**: `tracing` subscriber bootstrap
//! - **Event bus**: in-process lifecycle events
//! - **Platform interfaces**: device directory and ingestion traits

pub mod cluster;
pub mod communication;
pub mod config;
pub mod device;
pub mod error;
pub mod eventbus;
pub mod logging;
pub mod oid;
pub mod platform;

pub use cluster::{ServiceInfo, ServiceListChangedEvent, SNMP_TRANSPORT_NAME};
pub use communication::{
    CommunicationConfig, CommunicationSpec, DataType, DeviceProfileTransportConfig, SnmpMapping,
    SnmpMethod,
};
pub use config::{LoggingConfig, SocketConfig, TransportConfig, TransportProtocol};
pub use device::{
    AuthenticationProtocol, DeviceCredentials, DeviceId, DeviceTransportConfig, PrivacyProtocol,
    SessionInfo, SnmpDevice, SnmpProtocolVersion, TenantId, ToDeviceRpcRequest,
};
pub use error::{Error, Result};
pub use eventbus::{EventBus, EventBusReceiver, TransportEvent};
pub use oid::{parse_oid, Oid};
pub use platform::{DeviceDirectory, DevicePage, ResponseData, TransportService};
