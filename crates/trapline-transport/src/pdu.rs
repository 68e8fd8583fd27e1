//! Protocol data units as handed to and received from the SNMP client.
//!
//! Values, bindings and PDU types are the protocol library's. [`Pdu`] is
//! the envelope the engine tracks per exchange: it adds the v3 context
//! name to the library's request shape.

use bytes::Bytes;
use trapline_core::SnmpMethod;

pub use async_snmp::{PduType, Value, VarBind};

/// Octet string value from text.
pub fn octet_string(value: impl Into<String>) -> Value {
    Value::OctetString(Bytes::from(value.into()))
}

/// Null and the v2 exception values all mean "no value here".
pub fn is_null(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
    )
}

/// Binding without a value, as used in read requests.
pub fn null_binding(oid: trapline_core::Oid) -> VarBind {
    VarBind::new(oid, Value::Null)
}

/// PDU type of a request issued with `method`.
pub fn request_type(method: SnmpMethod) -> PduType {
    match method {
        SnmpMethod::Get => PduType::GetRequest,
        SnmpMethod::Set => PduType::SetRequest,
    }
}

/// A protocol data unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub pdu_type: PduType,
    /// Assigned by the client when the PDU is sent.
    pub request_id: i32,
    /// v3 scoped PDU context; `None` for v1/v2c.
    pub context_name: Option<String>,
    pub varbinds: Vec<VarBind>,
}

impl Pdu {
    pub fn new(pdu_type: PduType) -> Self {
        Self {
            pdu_type,
            request_id: 0,
            context_name: None,
            varbinds: Vec::new(),
        }
    }

    /// Scoped PDU for v3 exchanges.
    pub fn scoped(pdu_type: PduType, context_name: impl Into<String>) -> Self {
        Self {
            context_name: Some(context_name.into()),
            ..Self::new(pdu_type)
        }
    }

    pub fn with_binding(mut self, binding: VarBind) -> Self {
        self.varbinds.push(binding);
        self
    }

    pub fn add(&mut self, binding: VarBind) {
        self.varbinds.push(binding);
    }

    pub fn len(&self) -> usize {
        self.varbinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.varbinds.is_empty()
    }
}
