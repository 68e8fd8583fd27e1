//! Seam to the SNMP protocol library.
//!
//! The client owns the protocol socket and the wire encoding. It hands
//! responses (including timeouts, as a missing response) and traps back
//! through the event channel given to [`SnmpClient::listen`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use trapline_core::{DeviceId, Result, SocketConfig};

use crate::pdu::Pdu;
use crate::request::RequestContext;
use crate::target::Target;

/// Capacity of the client event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Correlation data the client hands back with the response.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub device_id: DeviceId,
    pub context: Arc<RequestContext>,
}

/// Outcome of one sent PDU.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub request: Pdu,
    /// `None` when the device did not answer before the target timeout.
    pub response: Option<Pdu>,
    /// Error reported by the library for this exchange.
    pub error: Option<String>,
    pub peer: Option<SocketAddr>,
    pub exchange: Exchange,
}

/// Unsolicited notification from a device.
#[derive(Debug, Clone)]
pub struct TrapEvent {
    pub peer: SocketAddr,
    pub pdu: Pdu,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Response(ResponseEvent),
    Trap(TrapEvent),
}

#[async_trait]
pub trait SnmpClient: Send + Sync {
    /// Bind the protocol socket and start delivering events.
    async fn listen(&self, socket: &SocketConfig, events: mpsc::Sender<ClientEvent>) -> Result<()>;

    /// Send a PDU. The response arrives later as a [`ClientEvent::Response`]
    /// carrying `exchange`.
    async fn send(&self, pdu: Pdu, target: &Target, exchange: Exchange) -> Result<()>;

    /// Forget a pending request so it is not delivered again.
    fn cancel(&self, request: &Pdu);

    /// Drop per-device state kept by the client, such as connections.
    fn release(&self, _device_id: &DeviceId) {}

    /// Close the socket. Pending requests are dropped.
    async fn close(&self) -> Result<()>;
}
