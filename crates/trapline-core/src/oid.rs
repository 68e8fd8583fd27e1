//! Object identifiers.
//!
//! The OID type is the protocol library's; this module adds the parsing
//! rules used for configuration (a single leading dot is accepted) and the
//! serde representation as a dotted string.

pub use async_snmp::Oid;

use crate::error::Result;

/// Parse a dotted OID, e.g. `1.3.6.1.2.1.1.3.0` or `.1.3.6.1.2.1.1.3.0`.
pub fn parse_oid(s: &str) -> Result<Oid> {
    let trimmed = s.trim();
    let body = trimmed.strip_prefix('.').unwrap_or(trimmed);
    if body.is_empty() {
        return Err(crate::config_err!("Invalid OID '{}'", s));
    }
    Oid::parse(body).map_err(|err| crate::config_err!("Invalid OID '{}': {}", s, err))
}

/// `#[serde(with = "crate::oid::serde_oid")]` for OID fields.
pub mod serde_oid {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{parse_oid, Oid};

    pub fn serialize<S>(oid: &Oid, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(oid)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Oid, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_oid(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "serde_oid")]
        oid: Oid,
    }

    #[test]
    fn test_parse_and_display() {
        let oid = parse_oid("1.3.6.1.2.1.1.3.0").unwrap();
        assert_eq!(oid.to_string(), "1.3.6.1.2.1.1.3.0");
    }

    #[test]
    fn test_leading_dot_is_equivalent() {
        assert_eq!(
            parse_oid(".1.3.6.1.4.1").unwrap(),
            parse_oid("1.3.6.1.4.1").unwrap()
        );
    }

    #[test]
    fn test_invalid_oids() {
        assert!(parse_oid("").unwrap_err().is_config());
        assert!(parse_oid(".").is_err());
        assert!(parse_oid("1.3.x.4").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let holder: Holder = serde_json::from_str(r#"{"oid": ".1.3.6.1.2.1.1.1.0"}"#).unwrap();
        assert_eq!(
            serde_json::to_string(&holder).unwrap(),
            r#"{"oid":"1.3.6.1.2.1.1.1.0"}"#
        );
        assert!(serde_json::from_str::<Holder>(r#"{"oid": "not-an-oid"}"#).is_err());
    }
}
