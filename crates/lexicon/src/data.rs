//! AT Protocol data model conversions
//!
//! Values travel through the validator and handlers as [`serde_json::Value`]
//! in the atproto JSON encoding, where binary data and CID links are wrapped
//! in single-key objects:
//!
//! - `{"$bytes": "<base64, no padding>"}` for bytes
//! - `{"$link": "<cid>"}` for CID links
//!
//! DAG-CBOR frames carry those natively, so this module converts between the
//! JSON form and [`Ipld`].

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Longest string kept by [`loggable`], in characters
const MAX_LOGGABLE_CHARS: usize = 100;

/// Errors converting between JSON and IPLD
#[derive(Debug, Error)]
pub enum DataError {
    /// `$link` value is not a parseable CID
    #[error("Invalid CID link {0}: {1}")]
    InvalidCid(String, String),

    /// `$bytes` value is not base64
    #[error("Invalid $bytes: {0}")]
    InvalidBytes(#[from] base64::DecodeError),

    /// Integer doesn't fit in a JSON number
    #[error("Integer {0} out of range")]
    IntegerOutOfRange(i128),

    /// NaN or infinity, which JSON can't represent
    #[error("Non-finite float {0}")]
    NonFiniteFloat(f64),
}

/// Result type for data model conversions
pub type Result<T> = std::result::Result<T, DataError>;

/// Convert an atproto JSON value to IPLD
pub fn to_ipld(value: &Value) -> Result<Ipld> {
    Ok(match value {
        Value::Null => Ipld::Null,
        Value::Bool(b) => Ipld::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ipld::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                Ipld::Integer(u.into())
            } else {
                Ipld::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Ipld::String(s.clone()),
        Value::Array(items) => Ipld::List(items.iter().map(to_ipld).collect::<Result<_>>()?),
        Value::Object(map) => {
            if let Some(link) = single(map, "$link") {
                let cid = Cid::try_from(link)
                    .map_err(|e| DataError::InvalidCid(link.to_string(), e.to_string()))?;
                Ipld::Link(cid)
            } else if let Some(bytes) = single(map, "$bytes") {
                Ipld::Bytes(STANDARD_NO_PAD.decode(bytes.trim_end_matches('='))?)
            } else {
                Ipld::Map(
                    map.iter()
                        .map(|(k, v)| Ok((k.clone(), to_ipld(v)?)))
                        .collect::<Result<BTreeMap<_, _>>>()?,
                )
            }
        }
    })
}

/// Convert IPLD to an atproto JSON value
pub fn from_ipld(ipld: Ipld) -> Result<Value> {
    Ok(match ipld {
        Ipld::Null => Value::Null,
        Ipld::Bool(b) => Value::Bool(b),
        Ipld::Integer(i) => {
            if let Ok(n) = i64::try_from(i) {
                Value::from(n)
            } else if let Ok(n) = u64::try_from(i) {
                Value::from(n)
            } else {
                return Err(DataError::IntegerOutOfRange(i));
            }
        }
        Ipld::Float(f) => Value::Number(Number::from_f64(f).ok_or(DataError::NonFiniteFloat(f))?),
        Ipld::String(s) => Value::String(s),
        Ipld::Bytes(bytes) => wrap("$bytes", STANDARD_NO_PAD.encode(bytes)),
        Ipld::Link(cid) => wrap("$link", cid.to_string()),
        Ipld::List(items) => {
            Value::Array(items.into_iter().map(from_ipld).collect::<Result<_>>()?)
        }
        Ipld::Map(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| Ok((k, from_ipld(v)?)))
                .collect::<Result<Map<_, _>>>()?,
        ),
    })
}

/// Shrink a value for debug logging
///
/// Strings are cut to 100 characters and `$bytes` payloads are replaced by
/// their decoded length.
pub fn loggable(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > MAX_LOGGABLE_CHARS => {
            Value::String(s.chars().take(MAX_LOGGABLE_CHARS).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(loggable).collect()),
        Value::Object(map) => {
            if let Some(bytes) = single(map, "$bytes") {
                let len = STANDARD_NO_PAD
                    .decode(bytes.trim_end_matches('='))
                    .map_or(0, |b| b.len());
                return Value::String(format!("{} bytes", len));
            }
            Value::Object(map.iter().map(|(k, v)| (k.clone(), loggable(v))).collect())
        }
        other => other.clone(),
    }
}

fn single<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    if map.len() == 1 {
        map.get(key).and_then(Value::as_str)
    } else {
        None
    }
}

fn wrap(key: &str, value: String) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), Value::String(value));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CID: &str = "bafyreiblaotetvwobe7cu2uqvnddr6ew2q3cu75qsoweulzku2egca4dxq";

    #[test]
    fn test_link_and_bytes_become_native() {
        let ipld = to_ipld(&json!({
            "link": {"$link": CID},
            "data": {"$bytes": "AQID"},
        }))
        .unwrap();

        let Ipld::Map(map) = ipld else {
            panic!("expected map");
        };
        assert!(matches!(&map["link"], Ipld::Link(cid) if cid.to_string() == CID));
        assert_eq!(map["data"], Ipld::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn test_from_ipld_wraps() {
        let value = from_ipld(Ipld::List(vec![
            Ipld::Bytes(vec![1, 2, 3]),
            Ipld::Link(Cid::try_from(CID).unwrap()),
            Ipld::Integer(-7),
            Ipld::Float(1.5),
        ]))
        .unwrap();

        assert_eq!(value, json!([{"$bytes": "AQID"}, {"$link": CID}, -7, 1.5]));
    }

    #[test]
    fn test_objects_with_extra_keys_stay_maps() {
        let ipld = to_ipld(&json!({"$link": CID, "other": 1})).unwrap();
        assert!(matches!(ipld, Ipld::Map(_)));
    }

    #[test]
    fn test_conversion_errors() {
        assert!(matches!(
            to_ipld(&json!({"$link": "nope"})),
            Err(DataError::InvalidCid(..))
        ));
        assert!(matches!(
            to_ipld(&json!({"$bytes": "!!"})),
            Err(DataError::InvalidBytes(_))
        ));
        assert!(matches!(
            from_ipld(Ipld::Integer(i128::MAX)),
            Err(DataError::IntegerOutOfRange(_))
        ));
        assert!(matches!(
            from_ipld(Ipld::Float(f64::NAN)),
            Err(DataError::NonFiniteFloat(_))
        ));
    }

    #[test]
    fn test_loggable() {
        let long = "x".repeat(150);
        let value = loggable(&json!({
            "text": long,
            "blob": {"$bytes": "AQID"},
            "list": [1, "short"],
        }));

        assert_eq!(value["text"].as_str().unwrap().len(), 100);
        assert_eq!(value["blob"], json!("3 bytes"));
        assert_eq!(value["list"], json!([1, "short"]));
    }
}
