//! The SNMP transport orchestrator.
//!
//! Owns the protocol client and every device session on this instance.
//! Outbound requests come from recurring queries, shared attribute updates
//! and RPC calls; inbound responses and traps are correlated here and their
//! processing is handed to the [`ResponseExecutor`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use trapline_core::{
    config_err, transport_err, CommunicationConfig, CommunicationSpec, DeviceDirectory, DeviceId,
    Error, EventBus, ResponseData, Result, SnmpMethod, ToDeviceRpcRequest, TransportConfig,
    TransportService,
};

use crate::auth::SnmpAuthService;
use crate::balancing::TransportBalancingService;
use crate::client::{Exchange, ResponseEvent, SnmpClient, TrapEvent};
use crate::codec::PduCodec;
use crate::executor::ResponseExecutor;
use crate::pdu::Pdu;
use crate::processing::ResponseProcessing;
use crate::request::RequestContext;
use crate::scheduler::{ScheduledTask, Scheduler, TokioScheduler};
use crate::session::DeviceSession;
use crate::snmp_client::AsyncSnmpClient;
use crate::usm::UsmUserTable;

/// `params` of a to-device RPC call.
#[derive(Debug, Deserialize)]
struct RpcParams {
    key: String,
    #[serde(default)]
    value: Option<Value>,
}

/// SNMP transport service of one instance.
pub struct SnmpTransportService {
    pub(crate) config: TransportConfig,
    pub(crate) codec: PduCodec,
    pub(crate) client: Arc<dyn SnmpClient>,
    pub(crate) auth: SnmpAuthService,
    pub(crate) balancer: Arc<TransportBalancingService>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) executor: ResponseExecutor,
    pub(crate) processing: Arc<ResponseProcessing>,
    pub(crate) transport_service: Arc<dyn TransportService>,
    pub(crate) directory: Arc<dyn DeviceDirectory>,
    pub(crate) event_bus: EventBus,
    pub(crate) sessions: DashMap<DeviceId, Arc<DeviceSession>>,
    pub(crate) background: Mutex<Vec<JoinHandle<()>>>,
}

impl SnmpTransportService {
    pub fn new(
        config: TransportConfig,
        client: Arc<dyn SnmpClient>,
        directory: Arc<dyn DeviceDirectory>,
        transport_service: Arc<dyn TransportService>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            codec: PduCodec::from_config(&config),
            auth: SnmpAuthService::new(Arc::new(UsmUserTable::new()), config.socket.transport),
            balancer: Arc::new(TransportBalancingService::new(event_bus.clone())),
            scheduler: Arc::new(TokioScheduler::new(config.querying_parallelism())),
            executor: ResponseExecutor::new(config.response_processing.parallelism_level),
            processing: Arc::new(ResponseProcessing::new()),
            sessions: DashMap::new(),
            background: Mutex::new(Vec::new()),
            config,
            client,
            transport_service,
            directory,
            event_bus,
        }
    }

    /// Service talking to devices through [`AsyncSnmpClient`], sharing one
    /// USM table between target construction and the client.
    pub fn with_async_client(
        config: TransportConfig,
        directory: Arc<dyn DeviceDirectory>,
        transport_service: Arc<dyn TransportService>,
        event_bus: EventBus,
    ) -> Self {
        let usm = Arc::new(UsmUserTable::new());
        let client = Arc::new(AsyncSnmpClient::new(usm.clone()));
        Self::new(config, client, directory, transport_service, event_bus).with_usm_table(usm)
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Share a USM table with other components of the process.
    pub fn with_usm_table(mut self, usm: Arc<UsmUserTable>) -> Self {
        self.auth = SnmpAuthService::new(usm, self.config.socket.transport);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn balancer(&self) -> &Arc<TransportBalancingService> {
        &self.balancer
    }

    pub fn auth(&self) -> &SnmpAuthService {
        &self.auth
    }

    pub fn executor(&self) -> &ResponseExecutor {
        &self.executor
    }

    pub fn session(&self, device_id: &DeviceId) -> Option<Arc<DeviceSession>> {
        self.sessions.get(device_id).map(|entry| entry.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Schedule a fixed-delay read for every config with a querying
    /// frequency. Ticks skip inactive sessions; send errors are reported
    /// and never stop the timer.
    pub fn create_querying_tasks(self: &Arc<Self>, session: &Arc<DeviceSession>) {
        for config in session.profile().repeating_configs() {
            let Some(frequency_ms) = config.querying_frequency_ms else {
                continue;
            };
            let frequency = std::time::Duration::from_millis(frequency_ms);
            let service: Weak<Self> = Arc::downgrade(self);
            let session_ref = session.clone();
            let shared_config = Arc::new(config.clone());

            let task: ScheduledTask = Arc::new(move || {
                let service = service.clone();
                let session = session_ref.clone();
                let config = shared_config.clone();
                async move {
                    let Some(service) = service.upgrade() else {
                        return;
                    };
                    if !session.is_active() {
                        return;
                    }
                    service.send_request(&session, &config, &HashMap::new()).await;
                }
                .boxed()
            });

            let handle = self
                .scheduler
                .schedule_with_fixed_delay(frequency, frequency, task);
            session.add_querying_task(handle);
            debug!(
                device_id = %session.device_id(),
                spec = %config.spec,
                frequency_ms,
                "Scheduled querying task"
            );
        }
    }

    /// Cancel every recurring query of the session. Idempotent.
    pub fn cancel_querying_tasks(&self, session: &DeviceSession) {
        let handles = session.take_querying_tasks();
        if handles.is_empty() {
            return;
        }
        for handle in &handles {
            handle.cancel();
        }
        debug!(
            device_id = %session.device_id(),
            count = handles.len(),
            "Cancelled querying tasks"
        );
    }

    /// Build the PDUs for a config and send them all. A failed send is
    /// reported and the remaining PDUs are still sent.
    pub async fn send_request(
        &self,
        session: &DeviceSession,
        config: &CommunicationConfig,
        values: &HashMap<String, String>,
    ) {
        let pdus = self
            .codec
            .build_pdus(session.context_name(), config, values);
        if pdus.is_empty() {
            trace!(device_id = %session.device_id(), spec = %config.spec, "Nothing to send");
            return;
        }

        let context = Arc::new(
            RequestContext::new(config.spec, config.method(), config.mappings.clone())
                .with_request_size(pdus.len()),
        );
        for pdu in pdus {
            self.send_pdu(session, pdu, context.clone()).await;
        }
    }

    async fn send_pdu(&self, session: &DeviceSession, pdu: Pdu, context: Arc<RequestContext>) {
        let spec = context.spec();
        let exchange = Exchange {
            device_id: session.device_id(),
            context,
        };
        trace!(
            device_id = %session.device_id(),
            target = %session.target().address,
            bindings = pdu.len(),
            "Sending PDU"
        );
        if let Err(err) = self.client.send(pdu, session.target(), exchange).await {
            error!(device_id = %session.device_id(), spec = %spec, "Failed to send request: {}", err);
            self.report_error(session, spec, &err);
        }
    }

    /// Correlate a response with its request and, once every part has
    /// arrived, hand it to processing.
    pub fn on_response(&self, event: ResponseEvent) {
        self.client.cancel(&event.request);

        let context = event.exchange.context.clone();
        let spec = context.spec();
        let device_id = event.exchange.device_id;
        let Some(session) = self.session(&device_id).filter(|s| s.is_active()) else {
            warn!(device_id = %device_id, spec = %spec, "Response for inactive or unknown session, dropping");
            return;
        };

        if let Some(message) = event.error {
            warn!(device_id = %device_id, spec = %spec, "SNMP exchange failed: {}", message);
            self.report_error(&session, spec, &transport_err!(message));
            return;
        }

        let parts = if context.request_size() == 1 {
            match event.response {
                Some(pdu) => vec![pdu],
                None => {
                    if context.method().is_read() {
                        self.report_error(&session, spec, &Error::NoResponse);
                    }
                    return;
                }
            }
        } else {
            match context.accumulate(event.response) {
                Some(parts) => parts,
                None => {
                    trace!(
                        device_id = %device_id,
                        received = context.received(),
                        request_size = context.request_size(),
                        "Waiting for more response parts"
                    );
                    return;
                }
            }
        };

        trace!(
            device_id = %device_id,
            spec = %spec,
            elapsed_ms = (Utc::now() - context.created_at()).num_milliseconds(),
            "Response complete"
        );
        self.submit_processing(session, context, parts);
    }

    /// Route a trap to the session whose target IP sent it.
    pub fn on_trap(&self, event: TrapEvent) {
        let source = event.peer.ip();
        let session = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .find(|session| {
                session.is_active()
                    && session.target().address.ip() == source
                    && self.balancer.is_owned_by_this_instance(&session.device_id())
            });
        let Some(session) = session else {
            warn!(peer = %event.peer, "SNMP trap from unknown source, ignoring");
            return;
        };

        let mappings = session
            .profile()
            .config_for(CommunicationSpec::ToServerRpcRequest)
            .map(|config| config.mappings.clone())
            .unwrap_or_default();
        let context = Arc::new(RequestContext::new(
            CommunicationSpec::ToServerRpcRequest,
            SnmpMethod::Get,
            mappings,
        ));
        debug!(device_id = %session.device_id(), peer = %event.peer, "Received SNMP trap");
        self.submit_processing(session, context, vec![event.pdu]);
    }

    /// Push updated shared attributes to the device. No-op without a
    /// shared attributes setting config.
    pub async fn on_attribute_update(&self, session: &DeviceSession, attributes: &ResponseData) {
        let Some(config) = session
            .profile()
            .config_for(CommunicationSpec::SharedAttributesSetting)
        else {
            trace!(device_id = %session.device_id(), "No shared attributes setting config");
            return;
        };

        let values: HashMap<String, String> = attributes
            .iter()
            .map(|(key, value)| (key.clone(), value_to_string(value)))
            .collect();
        self.send_request(session, config, &values).await;
    }

    /// Send a single-variable request for a to-device RPC call.
    pub async fn on_rpc_request(&self, session: &DeviceSession, request: &ToDeviceRpcRequest) -> Result<()> {
        let method: SnmpMethod = request.method_name.parse()?;
        let params: RpcParams = serde_json::from_str(&request.params)
            .map_err(|err| config_err!("Invalid RPC params: {}", err))?;
        let value = params.value.as_ref().map(value_to_string);
        if method == SnmpMethod::Set && value.is_none() {
            return Err(config_err!(
                "Value must be specified for SNMP method '{}'",
                method
            ));
        }

        let config = session
            .profile()
            .config_for(CommunicationSpec::ToDeviceRpcRequest)
            .ok_or_else(|| config_err!("No communication config found with RPC spec"))?;
        let mapping = config.mapping_for_key(&params.key).ok_or_else(|| {
            config_err!(
                "No SNMP mapping found in the config for specified key '{}'",
                params.key
            )
        })?;

        let pdu = self.codec.build_single_variable_pdu(
            session.context_name(),
            method,
            &mapping.oid,
            value.as_deref(),
            mapping.data_type,
        );
        let context = Arc::new(
            RequestContext::new(CommunicationSpec::ToDeviceRpcRequest, method, vec![mapping.clone()])
                .with_request_id(request.request_id),
        );
        let exchange = Exchange {
            device_id: session.device_id(),
            context,
        };
        self.client.send(pdu, session.target(), exchange).await
    }

    /// [`Self::on_rpc_request`], answering the caller with
    /// `{"error": ...}` when the request cannot be sent.
    pub async fn handle_rpc_request(&self, session: &DeviceSession, request: &ToDeviceRpcRequest) {
        let Err(err) = self.on_rpc_request(session, request).await else {
            return;
        };
        warn!(
            device_id = %session.device_id(),
            request_id = request.request_id,
            "Failed to process RPC request: {}",
            err
        );
        let payload = serde_json::json!({ "error": err.to_string() }).to_string();
        if let Err(err) = self
            .transport_service
            .submit_rpc_response(session.info(), request.request_id, payload)
            .await
        {
            self.report_error(session, CommunicationSpec::ToDeviceRpcRequest, &err);
        }
    }

    /// Process a complete response or trap on the executor. Errors,
    /// including panics inside decoders and the platform, are reported
    /// against the exchange's spec.
    fn submit_processing(&self, session: Arc<DeviceSession>, context: Arc<RequestContext>, parts: Vec<Pdu>) {
        let codec = self.codec.clone();
        let processing = self.processing.clone();
        let transport_service = self.transport_service.clone();
        self.executor.submit(async move {
            let spec = context.spec();
            let result = AssertUnwindSafe(process_response(
                &codec,
                &processing,
                transport_service.as_ref(),
                &session,
                &context,
                &parts,
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Error::Internal(format!(
                    "Response processing panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });
            if let Err(err) = result {
                warn!(device_id = %session.device_id(), spec = %spec, "Failed to process response: {}", err);
                transport_service.report_error(session.tenant_id(), session.device_id(), spec.label(), &err);
            }
        });
    }

    pub(crate) fn report_error(&self, session: &DeviceSession, spec: CommunicationSpec, err: &Error) {
        self.transport_service
            .report_error(session.tenant_id(), session.device_id(), spec.label(), err);
    }

    /// Publish a membership change to the balancer. Sessions are rebalanced
    /// by the listener started in [`Self::start`].
    pub fn on_service_list_changed(&self, event: &trapline_core::ServiceListChangedEvent) -> bool {
        let changed = self.balancer.on_service_list_changed(event);
        if changed {
            info!(
                instance_count = self.balancer.instance_count(),
                instance_index = self.balancer.instance_index(),
                "SNMP transport list changed"
            );
        }
        changed
    }
}

/// Decode and dispatch a complete response.
async fn process_response(
    codec: &PduCodec,
    processing: &ResponseProcessing,
    transport_service: &dyn TransportService,
    session: &DeviceSession,
    context: &RequestContext,
    parts: &[Pdu],
) -> Result<()> {
    let spec = context.spec();
    let Some(processor) = processing.processor_for(spec) else {
        trace!(device_id = %session.device_id(), spec = %spec, "No processor, response acknowledged");
        return Ok(());
    };

    let decoder = processing.decoder_for(spec);
    let data = decoder(codec, parts, context)?;
    if data.is_empty() {
        return Err(Error::EmptyResponse);
    }

    processor(transport_service, session.info(), context, data).await?;
    transport_service.report_activity(session.info());
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown")
}

/// Strings as is, everything else as its JSON text.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
