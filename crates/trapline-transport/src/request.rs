//! Per-exchange request context and multi-part response accumulation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use trapline_core::{CommunicationSpec, SnmpMapping, SnmpMethod};

use crate::pdu::Pdu;

#[derive(Debug, Default)]
struct Accumulator {
    parts: Vec<Option<Pdu>>,
    completed: bool,
}

/// What a request was for, travelling with it through the client.
#[derive(Debug)]
pub struct RequestContext {
    spec: CommunicationSpec,
    method: SnmpMethod,
    mappings: Vec<SnmpMapping>,
    /// Platform RPC request id, only for to-device RPC exchanges.
    request_id: Option<i32>,
    request_size: usize,
    created_at: DateTime<Utc>,
    accumulator: Mutex<Accumulator>,
}

impl RequestContext {
    pub fn new(spec: CommunicationSpec, method: SnmpMethod, mappings: Vec<SnmpMapping>) -> Self {
        Self {
            spec,
            method,
            mappings,
            request_id: None,
            request_size: 1,
            created_at: Utc::now(),
            accumulator: Mutex::new(Accumulator::default()),
        }
    }

    pub fn with_request_id(mut self, request_id: i32) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Number of PDUs sent for this request, i.e. responses to wait for.
    pub fn with_request_size(mut self, request_size: usize) -> Self {
        self.request_size = request_size.max(1);
        self
    }

    pub fn spec(&self) -> CommunicationSpec {
        self.spec
    }

    pub fn method(&self) -> SnmpMethod {
        self.method
    }

    pub fn mappings(&self) -> &[SnmpMapping] {
        &self.mappings
    }

    pub fn request_id(&self) -> Option<i32> {
        self.request_id
    }

    pub fn request_size(&self) -> usize {
        self.request_size
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Record one response part, `None` for a timed-out part.
    ///
    /// Returns the non-null parts exactly once, on the delivery that makes
    /// the count reach the request size. Arrival order does not matter.
    pub fn accumulate(&self, response: Option<Pdu>) -> Option<Vec<Pdu>> {
        let mut accumulator = self.accumulator.lock();
        if accumulator.completed {
            return None;
        }
        accumulator.parts.push(response);
        if accumulator.parts.len() < self.request_size {
            return None;
        }
        accumulator.completed = true;
        Some(std::mem::take(&mut accumulator.parts).into_iter().flatten().collect())
    }

    pub fn received(&self) -> usize {
        self.accumulator.lock().parts.len()
    }
}
