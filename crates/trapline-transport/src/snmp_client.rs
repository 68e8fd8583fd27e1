//! [`SnmpClient`] backed by the `async-snmp` protocol library.
//!
//! Requests to UDP targets share one ephemeral socket; TCP targets get a
//! connection per device, cached until the device's target changes or its
//! session is released. Traps are received on the configured bind port.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_snmp::{
    Auth, Client, NotificationReceiver, Oid, SharedClient, SharedUdpTransport, TcpTransport,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, trace, warn};
use trapline_core::{
    config_err, transport_err, DeviceId, Error, Result, SnmpProtocolVersion, SocketConfig,
    TransportProtocol,
};

use crate::client::{ClientEvent, Exchange, ResponseEvent, SnmpClient, TrapEvent};
use crate::pdu::{Pdu, PduType, Value, VarBind};
use crate::target::{Target, TargetSecurity};
use crate::usm::UsmUserTable;

/// Protocol session to one device.
enum Session {
    Udp(SharedClient),
    Tcp(Client<TcpTransport>),
}

impl Session {
    async fn get(&self, oids: &[Oid]) -> async_snmp::Result<Vec<VarBind>> {
        match self {
            Self::Udp(client) => client.get_many(oids).await,
            Self::Tcp(client) => client.get_many(oids).await,
        }
    }

    async fn set(&self, bindings: &[(Oid, Value)]) -> async_snmp::Result<Vec<VarBind>> {
        match self {
            Self::Udp(client) => client.set_many(bindings).await,
            Self::Tcp(client) => client.set_many(bindings).await,
        }
    }

    /// Run the request and return the bindings of the response.
    async fn exchange(&self, pdu: &Pdu) -> async_snmp::Result<Vec<VarBind>> {
        if pdu.pdu_type == PduType::SetRequest {
            let bindings: Vec<(Oid, Value)> = pdu
                .varbinds
                .iter()
                .map(|binding| (binding.oid.clone(), binding.value.clone()))
                .collect();
            self.set(&bindings).await
        } else {
            let oids: Vec<Oid> = pdu.varbinds.iter().map(|binding| binding.oid.clone()).collect();
            self.get(&oids).await
        }
    }
}

struct Connection {
    target: Target,
    session: Arc<Session>,
}

struct Listening {
    events: mpsc::Sender<ClientEvent>,
    udp: Arc<SharedUdpTransport>,
    trap_loop: JoinHandle<()>,
}

/// SNMP client over `async-snmp`.
pub struct AsyncSnmpClient {
    usm: Arc<UsmUserTable>,
    listening: Mutex<Option<Listening>>,
    connections: DashMap<DeviceId, Connection>,
    pending: Arc<DashMap<i32, AbortHandle>>,
    next_request_id: AtomicI32,
}

impl AsyncSnmpClient {
    /// `usm` must be the table the service registers v3 users in.
    pub fn new(usm: Arc<UsmUserTable>) -> Self {
        Self {
            usm,
            listening: Mutex::new(None),
            connections: DashMap::new(),
            pending: Arc::new(DashMap::new()),
            next_request_id: AtomicI32::new(1),
        }
    }

    /// Requests sent and not yet answered, timed out or cancelled.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Positive ids, wrapping back to 1.
    fn next_request_id(&self) -> i32 {
        self.next_request_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(id.checked_add(1).unwrap_or(1))
            })
            .unwrap_or_else(|id| id)
    }

    fn auth_for(&self, target: &Target) -> Result<Auth> {
        match &target.security {
            TargetSecurity::Community { community } => Ok(match target.version {
                SnmpProtocolVersion::V1 => Auth::v1(community.as_str()),
                _ => Auth::v2c(community.as_str()),
            }),
            TargetSecurity::User { user, .. } => self
                .usm
                .get(user)
                .map(|registered| registered.auth())
                .ok_or_else(|| config_err!("USM user '{}' is not registered", user.security_name)),
        }
    }

    /// Cached session for the device, rebuilt when its target changed.
    async fn session_for(
        &self,
        device_id: DeviceId,
        target: &Target,
        udp: &SharedUdpTransport,
    ) -> Result<Arc<Session>> {
        if let Some(connection) = self.connections.get(&device_id) {
            if connection.target == *target {
                return Ok(connection.session.clone());
            }
        }

        let builder = Client::builder(target.address.addr.to_string(), self.auth_for(target)?)
            .timeout(target.timeout)
            .retries(target.retries);
        let session = match target.address.protocol {
            TransportProtocol::Udp => {
                let handle = udp.handle(target.address.addr);
                Session::Udp(builder.build(handle).map_err(library_error)?)
            }
            TransportProtocol::Tcp => {
                let transport = TcpTransport::connect(target.address.addr)
                    .await
                    .map_err(library_error)?;
                Session::Tcp(builder.build(transport).map_err(library_error)?)
            }
        };
        let session = Arc::new(session);
        self.connections.insert(
            device_id,
            Connection {
                target: target.clone(),
                session: session.clone(),
            },
        );
        debug!(device_id = %device_id, target = %target.address, "Opened SNMP session");
        Ok(session)
    }
}

#[async_trait]
impl SnmpClient for AsyncSnmpClient {
    async fn listen(&self, socket: &SocketConfig, events: mpsc::Sender<ClientEvent>) -> Result<()> {
        let bind_addr = format!("0.0.0.0:{}", socket.bind_port);
        let receiver = NotificationReceiver::bind(bind_addr.as_str())
            .await
            .map_err(library_error)?;
        let udp = Arc::new(
            SharedUdpTransport::bind("0.0.0.0:0")
                .await
                .map_err(library_error)?,
        );
        let trap_loop = tokio::spawn(receive_traps(receiver, events.clone()));

        let previous = self.listening.lock().replace(Listening {
            events,
            udp,
            trap_loop,
        });
        if let Some(previous) = previous {
            previous.trap_loop.abort();
        }
        info!(bind_addr = %bind_addr, "SNMP trap receiver bound");
        Ok(())
    }

    async fn send(&self, mut pdu: Pdu, target: &Target, exchange: Exchange) -> Result<()> {
        let (events, udp) = {
            let listening = self.listening.lock();
            let listening = listening
                .as_ref()
                .ok_or_else(|| transport_err!("SNMP client is not listening"))?;
            (listening.events.clone(), listening.udp.clone())
        };
        let session = self.session_for(exchange.device_id, target, &udp).await?;

        let request_id = self.next_request_id();
        pdu.request_id = request_id;
        if let Some(context_name) = &pdu.context_name {
            trace!(request_id, context_name = %context_name, "Sending scoped PDU");
        }

        let peer = target.address.addr;
        let pending = self.pending.clone();
        // the entry guard keeps the task from completing before its handle
        // is registered
        let entry = self.pending.entry(request_id);
        let task = tokio::spawn(async move {
            let (response, error) = match session.exchange(&pdu).await {
                Ok(varbinds) => {
                    let response = Pdu {
                        pdu_type: PduType::Response,
                        request_id,
                        context_name: pdu.context_name.clone(),
                        varbinds,
                    };
                    (Some(response), None)
                }
                Err(err) if is_timeout(&err) => {
                    debug!(request_id, peer = %peer, "SNMP request timed out");
                    (None, None)
                }
                Err(err) => (None, Some(err.to_string())),
            };
            if pending.remove(&request_id).is_none() {
                trace!(request_id, "Request cancelled, dropping response");
                return;
            }
            let event = ResponseEvent {
                request: pdu,
                response,
                error,
                peer: Some(peer),
                exchange,
            };
            if events.send(ClientEvent::Response(event)).await.is_err() {
                debug!(request_id, "Client event channel closed");
            }
        });
        entry.insert(task.abort_handle());
        Ok(())
    }

    fn cancel(&self, request: &Pdu) {
        if let Some((_, task)) = self.pending.remove(&request.request_id) {
            task.abort();
        }
    }

    fn release(&self, device_id: &DeviceId) {
        if self.connections.remove(device_id).is_some() {
            debug!(device_id = %device_id, "Released SNMP session");
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(listening) = self.listening.lock().take() {
            listening.trap_loop.abort();
        }
        self.pending.retain(|_, task| {
            task.abort();
            false
        });
        self.connections.clear();
        Ok(())
    }
}

async fn receive_traps(receiver: NotificationReceiver, events: mpsc::Sender<ClientEvent>) {
    loop {
        match receiver.recv().await {
            Ok((notification, peer)) => {
                let pdu = notification
                    .varbinds()
                    .iter()
                    .cloned()
                    .fold(Pdu::new(PduType::TrapV2), Pdu::with_binding);
                trace!(peer = %peer, bindings = pdu.len(), "Received SNMP notification");
                if events.send(ClientEvent::Trap(TrapEvent { peer, pdu })).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!("Failed to receive SNMP notification: {}", err),
        }
    }
    debug!("SNMP trap receiver stopped");
}

fn is_timeout(err: &async_snmp::Error) -> bool {
    matches!(err, async_snmp::Error::Timeout { .. })
}

fn library_error(err: impl fmt::Display) -> Error {
    transport_err!(err.to_string())
}
