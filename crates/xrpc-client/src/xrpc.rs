//! XRPC request, error, and configuration types
//!
//! Reference: <https://atproto.com/specs/xrpc>

use lexicon::{FrameError, ValidationError, ValidationOptions, XrpcBody};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Default server when none is configured
pub const DEFAULT_PDS: &str = "https://bsky.social/";

/// Session bootstrap method
pub const LOGIN_NSID: &str = "com.atproto.server.createSession";

/// Session refresh method
pub const REFRESH_NSID: &str = "com.atproto.server.refreshSession";

/// Error names that mean the access token needs refreshing
pub const TOKEN_ERRORS: &[&str] = &[
    "AccountNotFound",
    "AuthenticationRequired",
    "ExpiredToken",
    "InvalidToken",
    "TokenRequired",
];

// =============================================================================
// Error Types
// =============================================================================

/// XRPC error response from a server
///
/// # Examples
/// ```
/// use xrpc_client::XrpcError;
///
/// let error = XrpcError::new(400, "ExpiredToken", "Token has expired");
/// assert_eq!(error.status(), 400);
/// assert!(error.is_token_error());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrpcError {
    /// HTTP status code
    status: u16,
    /// Error name (e.g., "InvalidRequest", "ExpiredToken")
    error: String,
    /// Human-readable error message
    message: String,
}

impl XrpcError {
    /// Create a new XRPC error
    pub fn new(status: u16, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
        }
    }

    /// Build from a non-2xx response body
    ///
    /// Bodies that aren't the standard `{error, message}` shape keep the raw
    /// text as the message.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<XrpcErrorResponse>(body) {
            Ok(response) => Self::new(
                status,
                response.error,
                response.message.unwrap_or_default(),
            ),
            Err(_) => Self::new(
                status,
                "Unknown",
                format!("HTTP {}: {}", status, String::from_utf8_lossy(body)),
            ),
        }
    }

    /// Get the HTTP status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Get the error name
    pub fn error(&self) -> &str {
        &self.error
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the error means the access token is expired or missing
    pub fn is_token_error(&self) -> bool {
        TOKEN_ERRORS.contains(&self.error.as_str())
    }
}

impl std::fmt::Display for XrpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "XRPC error {}: {} - {}",
            self.status, self.error, self.message
        )
    }
}

impl std::error::Error for XrpcError {}

/// Standard XRPC error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrpcErrorResponse {
    /// Error name
    pub error: String,
    /// Error message
    #[serde(default)]
    pub message: Option<String>,
}

/// Errors raised by the client
#[derive(Debug, Error)]
pub enum ClientError {
    /// No lexicon defines the method
    #[error("{0} not found")]
    NotFound(String),

    /// Parameters, input, output, or a message failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Server answered with an XRPC error
    #[error(transparent)]
    Xrpc(#[from] XrpcError),

    /// Connection or HTTP failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A body for a method declared as JSON isn't JSON
    #[error("Invalid JSON input: {0}")]
    InvalidInput(String),

    /// Response body didn't decode
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Header name or value isn't valid HTTP
    #[error("Invalid header {0}")]
    InvalidHeader(String),

    /// Subscription frame didn't decode
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Subscription connection failed
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The method kind doesn't support the requested operation
    #[error("{nsid} is a {kind}, not a {expected}")]
    WrongKind {
        /// Method NSID
        nsid: String,
        /// Definition kind found
        kind: &'static str,
        /// Kind the operation needs
        expected: &'static str,
    },
}

impl ClientError {
    /// The XRPC error response, if the server sent one
    pub fn xrpc(&self) -> Option<&XrpcError> {
        match self {
            ClientError::Xrpc(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

// =============================================================================
// Request Types
// =============================================================================

/// One XRPC call
///
/// # Examples
/// ```
/// use serde_json::json;
/// use xrpc_client::XrpcRequest;
///
/// let request = XrpcRequest::new("app.bsky.feed.getTimeline")
///     .param("limit", 25)
///     .param("cursor", "abc")
///     .header("Accept-Language", "en");
///
/// assert_eq!(request.params["limit"], json!(25));
/// assert!(request.input.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XrpcRequest {
    /// Method NSID (e.g., "com.atproto.repo.getRecord")
    pub nsid: String,
    /// Query parameters; nulls are dropped before sending
    pub params: Map<String, Value>,
    /// Request body
    pub input: XrpcBody,
    /// Per-call headers, applied after the client's headers
    pub headers: Vec<(String, String)>,
}

impl XrpcRequest {
    /// Create a request with no parameters or body
    pub fn new(nsid: impl Into<String>) -> Self {
        Self {
            nsid: nsid.into(),
            ..Default::default()
        }
    }

    /// Add a query parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replace all query parameters
    pub fn params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Set a JSON body
    pub fn input(mut self, input: Value) -> Self {
        self.input = XrpcBody::Json(input);
        self
    }

    /// Set a binary body
    ///
    /// Sent with the method's declared input encoding if it has one,
    /// otherwise with `content_type`.
    pub fn body(mut self, data: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        self.input = XrpcBody::bytes(data, content_type);
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for [`crate::Client`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base server URL
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Headers included in every request
    pub headers: Vec<(String, String)>,
    /// Validation mode for parameters, input, output, and messages
    pub validation: ValidationOptions,
    /// Initial access token
    pub access_token: Option<String>,
    /// Initial refresh token
    pub refresh_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PDS.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("lexrpc/{}", env!("CARGO_PKG_VERSION")),
            headers: Vec::new(),
            validation: ValidationOptions::default(),
            access_token: None,
            refresh_token: None,
        }
    }
}

impl ClientConfig {
    /// Create a new config with a base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set validation options
    pub fn with_validation(mut self, validation: ValidationOptions) -> Self {
        self.validation = validation;
        self
    }

    /// Start with an existing token pair
    pub fn with_tokens(
        mut self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        self.access_token = Some(access_token.into());
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// URL for a method: `{base}/xrpc/{nsid}`
    pub fn method_url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.base_url.trim_end_matches('/'), nsid)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_xrpc_error_from_response() {
        let error = XrpcError::from_response(
            400,
            br#"{"error": "ExpiredToken", "message": "Token has expired"}"#,
        );
        assert_eq!(error.status(), 400);
        assert_eq!(error.error(), "ExpiredToken");
        assert_eq!(error.message(), "Token has expired");
        assert!(error.is_token_error());
    }

    #[test]
    fn test_xrpc_error_from_non_json_response() {
        let error = XrpcError::from_response(502, b"Bad Gateway");
        assert_eq!(error.error(), "Unknown");
        assert_eq!(error.message(), "HTTP 502: Bad Gateway");
        assert!(!error.is_token_error());
    }

    #[test]
    fn test_xrpc_error_without_message() {
        let error = XrpcError::from_response(401, br#"{"error": "AuthenticationRequired"}"#);
        assert_eq!(error.message(), "");
        assert!(error.is_token_error());
    }

    #[test]
    fn test_xrpc_error_display() {
        let error = XrpcError::new(404, "NotFound", "Record not found");
        assert_eq!(error.to_string(), "XRPC error 404: NotFound - Record not found");
    }

    #[test]
    fn test_request_builder() {
        let request = XrpcRequest::new("io.example.query")
            .param("x", "y")
            .param("z", true)
            .header("X-Custom", "1")
            .input(json!({"foo": "bar"}));

        assert_eq!(request.nsid, "io.example.query");
        assert_eq!(Value::Object(request.params), json!({"x": "y", "z": true}));
        assert_eq!(request.headers, vec![("X-Custom".to_string(), "1".to_string())]);
        assert_eq!(request.input, XrpcBody::Json(json!({"foo": "bar"})));
    }

    #[test]
    fn test_request_binary_body() {
        let request = XrpcRequest::new("io.example.encodings").body(vec![1, 2, 3], "image/png");
        assert_eq!(request.input.as_bytes(), Some(&[1u8, 2, 3][..]));
        assert_eq!(request.input.content_type(), Some("image/png"));
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "https://bsky.social/");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("lexrpc/"));
        assert!(config.validation.strict);
        assert!(!config.validation.truncate);
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("http://localhost:2583")
            .with_timeout(Duration::from_secs(5))
            .with_user_agent("test/1.0")
            .with_header("X-Custom", "value")
            .with_tokens("access", "refresh");

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, "test/1.0");
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.access_token.as_deref(), Some("access"));
        assert_eq!(config.refresh_token.as_deref(), Some("refresh"));
    }

    #[test]
    fn test_method_url() {
        assert_eq!(
            ClientConfig::default().method_url("io.example.query"),
            "https://bsky.social/xrpc/io.example.query"
        );
        assert_eq!(
            ClientConfig::new("http://localhost:8080").method_url("io.example.query"),
            "http://localhost:8080/xrpc/io.example.query"
        );
    }
}
