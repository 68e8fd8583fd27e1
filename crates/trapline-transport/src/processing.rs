//! Per-purpose response decoding and dispatch tables.

use std::collections::HashMap;

use futures::future::BoxFuture;
use trapline_core::{
    CommunicationSpec, DataType, Error, ResponseData, Result, SessionInfo, TransportService,
};

use crate::codec::PduCodec;
use crate::pdu::Pdu;
use crate::request::RequestContext;

/// Method name under which traps are forwarded to the platform.
pub const TRAP_METHOD_NAME: &str = "TRAP";

/// Turns response PDUs into keyed values.
pub type ResponseDecoder = fn(&PduCodec, &[Pdu], &RequestContext) -> Result<ResponseData>;

/// Hands decoded values to the platform.
pub type ResponseProcessor = for<'a> fn(
    &'a dyn TransportService,
    &'a SessionInfo,
    &'a RequestContext,
    ResponseData,
) -> BoxFuture<'a, Result<()>>;

/// Decoder overrides and processors keyed by purpose, built once at
/// startup.
pub struct ResponseProcessing {
    decoders: HashMap<CommunicationSpec, ResponseDecoder>,
    processors: HashMap<CommunicationSpec, ResponseProcessor>,
}

impl ResponseProcessing {
    pub fn new() -> Self {
        let mut decoders: HashMap<CommunicationSpec, ResponseDecoder> = HashMap::new();
        decoders.insert(CommunicationSpec::ToDeviceRpcRequest, decode_by_oid);

        let mut processors: HashMap<CommunicationSpec, ResponseProcessor> = HashMap::new();
        processors.insert(CommunicationSpec::TelemetryQuerying, process_telemetry);
        processors.insert(CommunicationSpec::ClientAttributesQuerying, process_attributes);
        processors.insert(CommunicationSpec::ToDeviceRpcRequest, process_rpc_response);
        processors.insert(CommunicationSpec::ToServerRpcRequest, process_trap);

        Self {
            decoders,
            processors,
        }
    }

    /// Override if one is registered, else decoding by mapping.
    pub fn decoder_for(&self, spec: CommunicationSpec) -> ResponseDecoder {
        self.decoders.get(&spec).copied().unwrap_or(decode_by_mapping)
    }

    pub fn processor_for(&self, spec: CommunicationSpec) -> Option<ResponseProcessor> {
        self.processors.get(&spec).copied()
    }
}

impl Default for ResponseProcessing {
    fn default() -> Self {
        Self::new()
    }
}

/// Default decoder: only OIDs declared in the request's mappings.
pub fn decode_by_mapping(codec: &PduCodec, pdus: &[Pdu], ctx: &RequestContext) -> Result<ResponseData> {
    let raw = codec.decode_all(pdus);
    let mut data = ResponseData::new();
    codec.decode_and_map(&raw, ctx.mappings(), &mut data)?;
    Ok(data)
}

/// RPC decoder: every returned OID, keyed by its mapping or by the dotted
/// OID as a string when unmapped.
pub fn decode_by_oid(codec: &PduCodec, pdus: &[Pdu], ctx: &RequestContext) -> Result<ResponseData> {
    let mut data = ResponseData::new();
    for (oid, value) in codec.decode_all(pdus) {
        match ctx.mappings().iter().find(|m| m.oid == oid) {
            Some(mapping) => codec.process_value(&mapping.key, mapping.data_type, &value, &mut data)?,
            None => codec.process_value(&oid.to_string(), DataType::String, &value, &mut data)?,
        }
    }
    Ok(data)
}

fn process_telemetry<'a>(
    service: &'a dyn TransportService,
    session: &'a SessionInfo,
    _ctx: &'a RequestContext,
    data: ResponseData,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(service.submit_telemetry(session, data))
}

fn process_attributes<'a>(
    service: &'a dyn TransportService,
    session: &'a SessionInfo,
    _ctx: &'a RequestContext,
    data: ResponseData,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(service.submit_attributes(session, data))
}

fn process_rpc_response<'a>(
    service: &'a dyn TransportService,
    session: &'a SessionInfo,
    ctx: &'a RequestContext,
    data: ResponseData,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let request_id = ctx
            .request_id()
            .ok_or_else(|| Error::Internal("RPC response without request id".into()))?;
        let payload = serde_json::to_string(&data)?;
        service.submit_rpc_response(session, request_id, payload).await
    })
}

fn process_trap<'a>(
    service: &'a dyn TransportService,
    session: &'a SessionInfo,
    _ctx: &'a RequestContext,
    data: ResponseData,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let payload = serde_json::to_string(&data)?;
        service
            .submit_server_rpc_event(session, TRAP_METHOD_NAME, payload)
            .await
    })
}
