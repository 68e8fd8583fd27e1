//! Conversion between platform key/value/datatype triples and PDUs.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use tracing::{debug, trace};
use trapline_core::{
    CommunicationConfig, DataType, Error, Oid, ResponseData, Result, SnmpMapping, SnmpMethod,
    TransportConfig,
};

use crate::pdu::{self, null_binding, octet_string, request_type, Pdu, Value, VarBind};

/// Builds request PDUs and decodes response PDUs.
#[derive(Debug, Clone)]
pub struct PduCodec {
    max_request_oids: usize,
    ignore_type_cast_errors: bool,
}

impl PduCodec {
    pub fn new(max_request_oids: usize, ignore_type_cast_errors: bool) -> Self {
        Self {
            max_request_oids: max_request_oids.max(1),
            ignore_type_cast_errors,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.max_request_oids, config.ignore_type_cast_errors)
    }

    pub fn max_request_oids(&self) -> usize {
        self.max_request_oids
    }

    /// Build the request PDUs for a communication config.
    ///
    /// Mappings are split into batches of at most `max_request_oids`, in
    /// declaration order. With no values every mapping becomes a read
    /// binding; with values only the mappings that have one are kept, and
    /// batches left empty are dropped.
    pub fn build_pdus(
        &self,
        context_name: Option<&str>,
        config: &CommunicationConfig,
        values: &HashMap<String, String>,
    ) -> Vec<Pdu> {
        config
            .mappings
            .chunks(self.max_request_oids)
            .filter_map(|batch| {
                let mut pdu = new_pdu(context_name, config.method());
                for mapping in batch {
                    if !values.is_empty() && !values.contains_key(&mapping.key) {
                        continue;
                    }
                    let binding = match values.get(&mapping.key) {
                        Some(value) => {
                            VarBind::new(mapping.oid.clone(), to_variable(value, mapping.data_type))
                        }
                        None => null_binding(mapping.oid.clone()),
                    };
                    pdu.add(binding);
                }
                (!pdu.is_empty()).then_some(pdu)
            })
            .collect()
    }

    /// Single-binding PDU for RPC calls. A missing value is encoded as an
    /// explicit null, which is what a read needs.
    pub fn build_single_variable_pdu(
        &self,
        context_name: Option<&str>,
        method: SnmpMethod,
        oid: &Oid,
        value: Option<&str>,
        data_type: DataType,
    ) -> Pdu {
        let value = value
            .map(|v| to_variable(v, data_type))
            .unwrap_or(Value::Null);
        new_pdu(context_name, method).with_binding(VarBind::new(oid.clone(), value))
    }

    /// Flatten all bindings of the given PDUs into OID -> raw string,
    /// skipping null and exception values.
    pub fn decode_all(&self, pdus: &[Pdu]) -> HashMap<Oid, String> {
        pdus.iter()
            .flat_map(|pdu| pdu.varbinds.iter())
            .filter_map(|binding| raw_value(&binding.value).map(|raw| (binding.oid.clone(), raw)))
            .collect()
    }

    /// Cast every decoded value that has a mapping and store it under the
    /// mapping's key.
    pub fn decode_and_map(
        &self,
        raw: &HashMap<Oid, String>,
        mappings: &[SnmpMapping],
        target: &mut ResponseData,
    ) -> Result<()> {
        for mapping in mappings {
            if let Some(value) = raw.get(&mapping.oid) {
                self.process_value(&mapping.key, mapping.data_type, value, target)?;
            }
        }
        for oid in raw.keys() {
            if !mappings.iter().any(|m| &m.oid == oid) {
                debug!(%oid, "No SNMP mapping for OID");
            }
        }
        Ok(())
    }

    /// Cast one raw value and insert it. Cast failures are dropped or
    /// returned depending on `ignore_type_cast_errors`.
    pub fn process_value(
        &self,
        key: &str,
        data_type: DataType,
        value: &str,
        target: &mut ResponseData,
    ) -> Result<()> {
        match cast_value(data_type, value) {
            Ok(cast) => {
                target.insert(key.to_string(), cast);
                Ok(())
            }
            Err(err) if self.ignore_type_cast_errors => {
                debug!(key, %data_type, value, error = %err, "Ignoring type cast error");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn new_pdu(context_name: Option<&str>, method: SnmpMethod) -> Pdu {
    match context_name {
        Some(context) => Pdu::scoped(request_type(method), context),
        None => Pdu::new(request_type(method)),
    }
}

/// Textual form of a received value; `None` for null and exception values.
pub fn raw_value(value: &Value) -> Option<String> {
    if pdu::is_null(value) {
        return None;
    }
    Some(match value {
        Value::Integer(v) => v.to_string(),
        Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => v.to_string(),
        Value::Counter64(v) => v.to_string(),
        Value::OctetString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::ObjectIdentifier(oid) => oid.to_string(),
        other => other.to_string(),
    })
}

/// Encode a platform value as a protocol variable.
///
/// `LONG` values that parse as a 32-bit integer become `Integer`;
/// anything else, including `LONG` values that fail to parse, is sent as
/// an octet string.
pub fn to_variable(value: &str, data_type: DataType) -> Value {
    if data_type == DataType::Long {
        if let Ok(number) = value.trim().parse::<i32>() {
            return Value::Integer(number);
        }
        trace!(value, "LONG value is not an integer, sending as string");
    }
    octet_string(value)
}

/// Cast a raw decoded string to its declared datatype.
///
/// `JSON` values are passed through as text; the platform parses them.
pub fn cast_value(data_type: DataType, value: &str) -> Result<JsonValue> {
    match data_type {
        DataType::String | DataType::Json => Ok(JsonValue::String(value.to_string())),
        DataType::Long => value
            .trim()
            .parse::<i64>()
            .map(JsonValue::from)
            .map_err(|_| cast_error(value, data_type)),
        DataType::Double => value
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .ok_or_else(|| cast_error(value, data_type)),
        DataType::Boolean => {
            let trimmed = value.trim();
            if trimmed.eq_ignore_ascii_case("true") {
                Ok(JsonValue::Bool(true))
            } else if trimmed.eq_ignore_ascii_case("false") {
                Ok(JsonValue::Bool(false))
            } else {
                Err(cast_error(value, data_type))
            }
        }
    }
}

fn cast_error(value: &str, data_type: DataType) -> Error {
    Error::TypeCast(format!("Failed to cast value '{}' to {}", value, data_type))
}
