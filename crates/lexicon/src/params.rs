//! Query parameter codec
//!
//! XRPC parameters travel in the URL query string. Booleans are the bare
//! words `true`/`false`, arrays repeat their key once per element, and
//! everything else is stringified. Decoding needs the method's `parameters`
//! schema to know which strings are numbers or booleans.
//!
//! Reference: <https://atproto.com/specs/xrpc#lexicon-http-endpoints>

use super::defs::{Definition, LexObject};
use super::registry::LexiconRegistry;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Errors decoding query parameters
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParamsError {
    /// The method has no definition
    #[error("{0} not found")]
    NotFound(String),

    /// Boolean parameter that isn't `true` or `false`
    #[error("Got '{value}' for boolean parameter {name}, expected true or false")]
    InvalidBoolean {
        /// Parameter name
        name: String,
        /// Raw value
        value: String,
    },

    /// Numeric parameter that doesn't parse
    #[error("invalid value '{value}' for {kind} parameter {name}")]
    InvalidNumber {
        /// `integer` or `number`
        kind: &'static str,
        /// Parameter name
        name: String,
        /// Raw value
        value: String,
    },
}

/// Result type for parameter decoding
pub type Result<T> = std::result::Result<T, ParamsError>;

/// Encode parameter values as a query string
///
/// Null values are dropped. Keys and values are percent-encoded.
///
/// # Examples
///
/// ```
/// use lexicon::encode_params;
/// use serde_json::json;
///
/// let params = json!({"limit": 5, "tags": ["a", "b c"], "x": true});
/// assert_eq!(
///     encode_params(params.as_object().unwrap()),
///     "limit=5&tags=a&tags=b%20c&x=true"
/// );
/// ```
pub fn encode_params(params: &Map<String, Value>) -> String {
    let mut pairs = Vec::new();

    for (name, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items.iter().filter(|v| !v.is_null()) {
                    pairs.push(encode_pair(name, item));
                }
            }
            other => pairs.push(encode_pair(name, other)),
        }
    }

    pairs.join("&")
}

fn encode_pair(name: &str, value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!("{}={}", urlencoding::encode(name), urlencoding::encode(&text))
}

/// Split a raw query string into decoded `(name, value)` pairs
///
/// `+` decodes to a space. Malformed percent escapes are kept verbatim.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Decode query parameter pairs using a method's `parameters` schema
///
/// Repeated names accumulate into arrays for array-typed parameters.
/// Parameters the schema doesn't declare decode as strings; the validator
/// decides whether they're allowed.
pub fn decode_params(
    registry: &LexiconRegistry,
    nsid: &str,
    pairs: &[(String, String)],
) -> Result<Map<String, Value>> {
    let def = registry
        .get(nsid)
        .ok_or_else(|| ParamsError::NotFound(nsid.to_string()))?;
    let schema = parameters(def);

    let mut decoded = Map::new();
    for (name, raw) in pairs {
        let declared = schema.and_then(|s| s.properties.get(name));

        match declared {
            Some(Definition::Array(array)) => {
                let item = decode_scalar(&array.items, name, raw)?;
                match decoded
                    .entry(name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()))
                {
                    Value::Array(items) => items.push(item),
                    other => *other = Value::Array(vec![item]),
                }
            }
            Some(def) => {
                decoded.insert(name.clone(), decode_scalar(def, name, raw)?);
            }
            None => {
                decoded.insert(name.clone(), Value::String(raw.clone()));
            }
        }
    }

    Ok(decoded)
}

fn parameters(def: &Definition) -> Option<&LexObject> {
    match def {
        Definition::Query(m) | Definition::Procedure(m) => m.parameters.as_ref(),
        Definition::Subscription(s) => s.parameters.as_ref(),
        _ => None,
    }
}

fn decode_scalar(def: &Definition, name: &str, raw: &str) -> Result<Value> {
    match def {
        Definition::Boolean(_) => match raw {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(ParamsError::InvalidBoolean {
                name: name.to_string(),
                value: raw.to_string(),
            }),
        },
        Definition::Integer(_) => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid_number("integer", name, raw)),
        Definition::Number(_) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid_number("number", name, raw)),
        _ => Ok(Value::String(raw.to_string())),
    }
}

fn invalid_number(kind: &'static str, name: &str, raw: &str) -> ParamsError {
    ParamsError::InvalidNumber {
        kind,
        name: name.to_string(),
        value: raw.to_string(),
    }
}
