//! XRPC request and response bodies

use super::JSON_ENCODING;
use serde_json::Value;

/// Payload of an XRPC input or output
///
/// JSON bodies are validated against their slot schema. Any other encoding
/// travels as opaque bytes tagged with its content type.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum XrpcBody {
    /// No body
    #[default]
    Empty,

    /// `application/json` body
    Json(Value),

    /// Binary body in some other encoding
    Bytes {
        /// Raw payload
        data: Vec<u8>,
        /// MIME type, if known
        content_type: Option<String>,
    },
}

impl XrpcBody {
    /// Binary body with a content type
    pub fn bytes(data: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        XrpcBody::Bytes {
            data: data.into(),
            content_type: Some(content_type.into()),
        }
    }

    /// Whether there's no body at all
    pub fn is_empty(&self) -> bool {
        matches!(self, XrpcBody::Empty)
    }

    /// The JSON value, if this is a JSON body
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            XrpcBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Take the JSON value, if this is a JSON body
    pub fn into_json(self) -> Option<Value> {
        match self {
            XrpcBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Raw bytes, if this is a binary body
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            XrpcBody::Bytes { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Content type the body would be sent with
    pub fn content_type(&self) -> Option<&str> {
        match self {
            XrpcBody::Empty => None,
            XrpcBody::Json(_) => Some(JSON_ENCODING),
            XrpcBody::Bytes { content_type, .. } => content_type.as_deref(),
        }
    }

    /// Short description for debug logs
    pub fn loggable(&self) -> String {
        match self {
            XrpcBody::Empty => "(empty)".to_string(),
            XrpcBody::Json(value) => super::data::loggable(value).to_string(),
            XrpcBody::Bytes { data, .. } => format!("{} bytes", data.len()),
        }
    }
}

impl From<Value> for XrpcBody {
    fn from(value: Value) -> Self {
        XrpcBody::Json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_types() {
        assert_eq!(XrpcBody::Empty.content_type(), None);
        assert_eq!(XrpcBody::from(json!({})).content_type(), Some("application/json"));
        assert_eq!(
            XrpcBody::bytes(vec![1, 2], "image/png").content_type(),
            Some("image/png")
        );
    }

    #[test]
    fn test_accessors() {
        let json = XrpcBody::from(json!({"a": 1}));
        assert_eq!(json.as_json(), Some(&json!({"a": 1})));
        assert!(json.as_bytes().is_none());

        let bytes = XrpcBody::bytes(vec![1, 2, 3], "application/octet-stream");
        assert_eq!(bytes.as_bytes(), Some(&[1u8, 2, 3][..]));
        assert_eq!(bytes.loggable(), "3 bytes");
        assert!(bytes.into_json().is_none());
    }
}
