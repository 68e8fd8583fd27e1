//! Recording fakes for the collaborators of the SNMP transport.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use trapline_core::{
    parse_oid, CommunicationConfig, CommunicationSpec, DataType, DeviceCredentials,
    DeviceDirectory, DeviceId, DevicePage, DeviceProfileTransportConfig, DeviceTransportConfig,
    Error, EventBus, Oid, ResponseData, Result, SessionInfo, SnmpDevice, SnmpMapping,
    SnmpProtocolVersion, SocketConfig, TenantId, TransportConfig, TransportService,
};
use trapline_transport::{
    ClientEvent, Exchange, Pdu, PduType, ResponseEvent, SnmpClient, SnmpTransportService, Target,
    Value, VarBind,
};

#[derive(Debug, Clone)]
pub struct SentRequest {
    pub pdu: Pdu,
    pub target: Target,
    pub exchange: Exchange,
}

impl SentRequest {
    /// Response carrying the given value for every requested OID.
    pub fn reply_with(&self, value: Value) -> ResponseEvent {
        let pdu = self
            .pdu
            .varbinds
            .iter()
            .fold(Pdu::new(PduType::Response), |pdu, binding| {
                pdu.with_binding(VarBind::new(binding.oid.clone(), value.clone()))
            });
        self.reply(Some(pdu))
    }

    pub fn reply(&self, response: Option<Pdu>) -> ResponseEvent {
        ResponseEvent {
            request: self.pdu.clone(),
            response,
            error: None,
            peer: Some(self.target.address.addr),
            exchange: self.exchange.clone(),
        }
    }

    pub fn fail(&self, message: &str) -> ResponseEvent {
        ResponseEvent {
            error: Some(message.to_string()),
            ..self.reply(None)
        }
    }
}

/// Client that records what is sent and can fail selected sends.
#[derive(Default)]
pub struct FakeClient {
    pub sent: Mutex<Vec<SentRequest>>,
    pub cancelled: AtomicUsize,
    pub fail_sends: Mutex<Vec<usize>>,
    attempts: AtomicUsize,
    pub events: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    pub closed: AtomicUsize,
    pub released: Mutex<Vec<DeviceId>>,
}

impl FakeClient {
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Fail the n-th (zero-based) send attempt.
    pub fn fail_attempt(&self, attempt: usize) {
        self.fail_sends.lock().push(attempt);
    }

    pub fn events(&self) -> mpsc::Sender<ClientEvent> {
        self.events.lock().clone().expect("client is not listening")
    }
}

#[async_trait]
impl SnmpClient for FakeClient {
    async fn listen(&self, _socket: &SocketConfig, events: mpsc::Sender<ClientEvent>) -> Result<()> {
        *self.events.lock() = Some(events);
        Ok(())
    }

    async fn send(&self, pdu: Pdu, target: &Target, exchange: Exchange) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends.lock().contains(&attempt) {
            return Err(Error::Transport("socket closed".into()));
        }
        self.sent.lock().push(SentRequest {
            pdu,
            target: target.clone(),
            exchange,
        });
        Ok(())
    }

    fn cancel(&self, _request: &Pdu) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, device_id: &DeviceId) {
        self.released.lock().push(*device_id);
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        *self.events.lock() = None;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    pub devices: Mutex<HashMap<DeviceId, SnmpDevice>>,
    pub credentials: Mutex<HashMap<DeviceId, DeviceCredentials>>,
    pub order: Mutex<Vec<DeviceId>>,
    /// Devices whose lookup fails with an internal error.
    pub failing: Mutex<HashSet<DeviceId>>,
}

impl FakeDirectory {
    pub fn add(&self, device: SnmpDevice, credentials: DeviceCredentials) {
        self.order.lock().push(device.id);
        self.credentials.lock().insert(device.id, credentials);
        self.devices.lock().insert(device.id, device);
    }

    pub fn add_with_token(&self, device: SnmpDevice) {
        let token = format!("token-{}", device.id);
        self.add(device, DeviceCredentials::AccessToken { token });
    }

    pub fn update(&self, device: SnmpDevice) {
        self.devices.lock().insert(device.id, device);
    }

    pub fn fail_lookups(&self, device_id: DeviceId) {
        self.failing.lock().insert(device_id);
    }
}

#[async_trait]
impl DeviceDirectory for FakeDirectory {
    async fn get_device(&self, device_id: DeviceId) -> Result<Option<SnmpDevice>> {
        if self.failing.lock().contains(&device_id) {
            return Err(Error::Internal("device store unavailable".into()));
        }
        Ok(self.devices.lock().get(&device_id).cloned())
    }

    async fn get_device_credentials(&self, device_id: DeviceId) -> Result<Option<DeviceCredentials>> {
        Ok(self.credentials.lock().get(&device_id).cloned())
    }

    async fn list_devices_for_this_transport(&self, page: usize, page_size: usize) -> Result<DevicePage> {
        let order = self.order.lock();
        let devices: Vec<DeviceId> = order.iter().skip(page * page_size).take(page_size).copied().collect();
        Ok(DevicePage {
            has_next: (page + 1) * page_size < order.len(),
            devices,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Telemetry(DeviceId, ResponseData),
    Attributes(DeviceId, ResponseData),
    RpcResponse(DeviceId, i32, String),
    ServerRpcEvent(DeviceId, String, String),
    Activity(DeviceId),
    Error(DeviceId, String, Error),
}

/// Transport service recording every call.
#[derive(Default)]
pub struct RecordingTransportService {
    pub calls: Mutex<Vec<Call>>,
    /// Panic inside `submit_server_rpc_event`.
    pub panic_on_server_rpc: AtomicBool,
}

impl RecordingTransportService {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn errors(&self) -> Vec<(String, Error)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Error(_, purpose, err) => Some((purpose, err)),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

#[async_trait]
impl TransportService for RecordingTransportService {
    async fn submit_telemetry(&self, session: &SessionInfo, values: ResponseData) -> Result<()> {
        self.calls.lock().push(Call::Telemetry(session.device_id, values));
        Ok(())
    }

    async fn submit_attributes(&self, session: &SessionInfo, values: ResponseData) -> Result<()> {
        self.calls.lock().push(Call::Attributes(session.device_id, values));
        Ok(())
    }

    async fn submit_rpc_response(&self, session: &SessionInfo, request_id: i32, payload: String) -> Result<()> {
        self.calls
            .lock()
            .push(Call::RpcResponse(session.device_id, request_id, payload));
        Ok(())
    }

    async fn submit_server_rpc_event(
        &self,
        session: &SessionInfo,
        method_name: &str,
        payload: String,
    ) -> Result<()> {
        if self.panic_on_server_rpc.load(Ordering::SeqCst) {
            panic!("event queue poisoned");
        }
        self.calls.lock().push(Call::ServerRpcEvent(
            session.device_id,
            method_name.to_string(),
            payload,
        ));
        Ok(())
    }

    fn report_activity(&self, session: &SessionInfo) {
        self.calls.lock().push(Call::Activity(session.device_id));
    }

    fn report_error(&self, _tenant_id: TenantId, device_id: DeviceId, purpose: &str, error: &Error) {
        self.calls
            .lock()
            .push(Call::Error(device_id, purpose.to_string(), error.clone()));
    }
}

pub fn oid(s: &str) -> Oid {
    parse_oid(s).unwrap()
}

pub fn mapping(oid: &str, key: &str, data_type: DataType) -> SnmpMapping {
    SnmpMapping::new(parse_oid(oid).unwrap(), key, data_type)
}

pub fn device(host: &str, profile: DeviceProfileTransportConfig) -> SnmpDevice {
    SnmpDevice {
        id: DeviceId::new(),
        tenant_id: TenantId::new(),
        name: format!("snmp-{}", host),
        device_type: "switch".into(),
        profile,
        transport: DeviceTransportConfig::community(host, 161, SnmpProtocolVersion::V2c, "public"),
    }
}

/// Profile with telemetry (no frequency), RPC, shared attributes and trap
/// configs.
pub fn full_profile() -> DeviceProfileTransportConfig {
    DeviceProfileTransportConfig::default()
        .with_config(
            CommunicationConfig::new(CommunicationSpec::TelemetryQuerying)
                .with_mapping(mapping("1.3.6.1.2.1.1.3.0", "uptime", DataType::Long))
                .with_mapping(mapping("1.3.6.1.4.1.2021.10.1.3.1", "load", DataType::Double))
                .with_mapping(mapping("1.3.6.1.2.1.1.5.0", "name", DataType::String)),
        )
        .with_config(
            CommunicationConfig::new(CommunicationSpec::ToDeviceRpcRequest)
                .with_mapping(mapping("1.3.6.1.4.1.99.1.1", "setpoint", DataType::Long)),
        )
        .with_config(
            CommunicationConfig::new(CommunicationSpec::SharedAttributesSetting)
                .with_mapping(mapping("1.3.6.1.4.1.99.2.1", "mode", DataType::String))
                .with_mapping(mapping("1.3.6.1.4.1.99.2.2", "threshold", DataType::Long)),
        )
        .with_config(
            CommunicationConfig::new(CommunicationSpec::ToServerRpcRequest)
                .with_mapping(mapping("1.3.6.1.6.3.1.1.4.1.0", "trapOid", DataType::String))
                .with_mapping(mapping("1.3.6.1.4.1.99.3.1", "alarm", DataType::Boolean)),
        )
}

pub struct Harness {
    pub client: Arc<FakeClient>,
    pub directory: Arc<FakeDirectory>,
    pub platform: Arc<RecordingTransportService>,
    pub event_bus: EventBus,
    pub service: Arc<SnmpTransportService>,
}

impl Harness {
    pub fn new(config: TransportConfig) -> Self {
        let client = Arc::new(FakeClient::default());
        let directory = Arc::new(FakeDirectory::default());
        let platform = Arc::new(RecordingTransportService::default());
        let event_bus = EventBus::new();
        let service = Arc::new(SnmpTransportService::new(
            config,
            client.clone(),
            directory.clone(),
            platform.clone(),
            event_bus.clone(),
        ));
        Self {
            client,
            directory,
            platform,
            event_bus,
            service,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TransportConfig::default())
    }

    /// Register a device and bring its session up.
    pub async fn session_for(&self, device: SnmpDevice) -> DeviceId {
        let id = device.id;
        self.directory.add_with_token(device);
        assert!(self.service.establish_session(id).await.unwrap());
        id
    }

    /// Deliver a response and wait for its processing.
    pub async fn deliver(&self, event: ResponseEvent) {
        self.service.on_response(event);
        self.service.executor().drain().await;
    }
}

pub fn peer(ip: &str) -> SocketAddr {
    SocketAddr::new(ip.parse().unwrap(), 16200)
}
