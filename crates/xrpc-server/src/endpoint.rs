//! HTTP boundary for `/xrpc/{nsid}`
//!
//! [`XrpcEndpoint`] turns plain [`HttpRequest`] values into
//! [`HttpResponse`] values, so any web framework can mount it with a thin
//! adapter. It decodes query parameters and bodies, calls the
//! [`XrpcServer`], and maps the outcome or error to an XRPC response:
//!
//! | failure | status | `error` |
//! |---|---|---|
//! | invalid NSID, params, input, or output | 400 | `InvalidRequest` |
//! | unknown or unimplemented method | 501 | `MethodNotImplemented` |
//! | named handler error | 400 | its own name |
//! | subscription over plain HTTP | 405 | `InvalidRequest` |
//! | second subscriber from one address | 429 | `TooManyRequests` |
//!
//! Every response allows any origin, method, and header.

use super::dispatcher::{DispatchError, HandlerOutcome, NamedError, Redirect, XrpcServer};
use super::subscription::{Subscriber, Subscribers, SubscriptionSession};
use lexicon::{
    decode_params, is_accepted_mime_type, is_valid_nsid, parse_query, Definition, LexXrpcMethod,
    XrpcBody, JSON_ENCODING,
};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Path prefix for XRPC methods
pub const XRPC_PREFIX: &str = "/xrpc/";

/// Headers on every response
pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Headers", "*"),
    ("Access-Control-Allow-Methods", "*"),
    ("Access-Control-Allow-Origin", "*"),
];

const OCTET_STREAM: &str = "application/octet-stream";

// =============================================================================
// HTTP Types
// =============================================================================

/// HTTP request method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// OPTIONS, for CORS preflight
    Options,
    /// Anything else
    Other(String),
}

impl From<&str> for HttpMethod {
    fn from(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "OPTIONS" => HttpMethod::Options,
            other => HttpMethod::Other(other.to_string()),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Options => write!(f, "OPTIONS"),
            HttpMethod::Other(method) => write!(f, "{}", method),
        }
    }
}

/// Inbound request to `/xrpc/{nsid}`
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Request method
    pub method: HttpMethod,
    /// Method NSID from the path
    pub nsid: String,
    /// Decoded query string pairs, in order
    pub query: Vec<(String, String)>,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// Raw body
    pub body: Vec<u8>,
    /// Peer address, if the framework knows it
    pub remote_addr: Option<String>,
}

impl HttpRequest {
    /// Create a request with no query, headers, or body
    pub fn new(method: HttpMethod, nsid: impl Into<String>) -> Self {
        Self {
            method,
            nsid: nsid.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
            remote_addr: None,
        }
    }

    /// Create a request from a path like `/xrpc/io.example.query?x=y`
    ///
    /// Returns `None` for paths outside `/xrpc/`.
    pub fn from_path(method: HttpMethod, path: &str) -> Option<Self> {
        let rest = path.strip_prefix(XRPC_PREFIX)?;
        let (nsid, query) = rest.split_once('?').unwrap_or((rest, ""));
        Some(Self::new(method, nsid).with_query(query))
    }

    /// Append parameters from a raw query string
    pub fn with_query(mut self, query: &str) -> Self {
        self.query.extend(parse_query(query));
        self
    }

    /// Append one query parameter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body and its `Content-Type`
    pub fn with_json(self, body: &Value) -> Self {
        self.with_header("Content-Type", JSON_ENCODING)
            .with_body(body.to_string())
    }

    /// Set the peer address
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// First value of a header, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// MIME type from `Content-Type`, without parameters
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
            .and_then(|v| v.split(';').next())
            .map(str::trim)
    }

    /// Client address: the first `X-Forwarded-For` entry, or the peer
    pub fn client_ip(&self) -> Option<String> {
        self.header("X-Forwarded-For")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| self.remote_addr.clone())
    }
}

/// Outbound response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers, CORS headers first
    pub headers: Vec<(String, String)>,
    /// Raw body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Empty response with CORS headers
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: CORS_HEADERS
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: Vec::new(),
        }
    }

    /// JSON response
    pub fn json(status: u16, body: &Value) -> Self {
        Self::bytes(status, body.to_string(), JSON_ENCODING)
    }

    /// Binary response
    pub fn bytes(status: u16, body: impl Into<Vec<u8>>, content_type: &str) -> Self {
        let mut response = Self::new(status).with_header("Content-Type", content_type);
        response.body = body.into();
        response
    }

    /// XRPC error response
    pub fn error(status: u16, error: &str, message: impl Into<String>) -> Self {
        Self::json(status, &json!({"error": error, "message": message.into()}))
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as JSON
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// Serves an [`XrpcServer`] over HTTP
///
/// Clones share the server and the subscriber set.
#[derive(Debug, Clone)]
pub struct XrpcEndpoint {
    server: Arc<XrpcServer>,
    subscribers: Subscribers,
}

impl XrpcEndpoint {
    /// Create an endpoint for a server
    pub fn new(server: impl Into<Arc<XrpcServer>>) -> Self {
        Self {
            server: server.into(),
            subscribers: Subscribers::new(),
        }
    }

    /// Get the server
    pub fn server(&self) -> &XrpcServer {
        &self.server
    }

    /// Get the active subscribers
    pub fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    /// Handle a query, procedure, or CORS preflight request
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        let nsid = request.nsid.as_str();
        let def = match self.definition(nsid) {
            Ok(def) => def,
            Err(response) => return response,
        };

        if request.method == HttpMethod::Options {
            return HttpResponse::new(200);
        }

        let method = match def {
            Definition::Query(method) | Definition::Procedure(method) => method,
            Definition::Subscription(_) => {
                return HttpResponse::error(
                    405,
                    "InvalidRequest",
                    format!("Use websocket for {}, not HTTP", nsid),
                )
            }
            _ => {
                return HttpResponse::error(
                    501,
                    "MethodNotImplemented",
                    format!("{} not implemented", nsid),
                )
            }
        };

        let input = match read_input(method, &request) {
            Ok(input) => input,
            Err(response) => return response,
        };

        let params = match decode_params(self.server.registry(), nsid, &request.query) {
            Ok(params) => params,
            Err(e) => return error_response(&DispatchError::from(e)),
        };

        match self.server.call(nsid, input, params).await {
            Ok(outcome) => write_output(method, outcome),
            Err(e) => error_response(&e),
        }
    }

    /// Admit a subscriber and start its subscription
    ///
    /// On success, upgrade the connection and pass the socket to
    /// [`SubscriptionSession::run`]. On failure, send the returned response
    /// instead of upgrading.
    pub async fn accept_subscription(
        &self,
        request: HttpRequest,
    ) -> Result<SubscriptionSession, HttpResponse> {
        let nsid = request.nsid.as_str();
        let def = self.definition(nsid)?;
        if !matches!(def, Definition::Subscription(_)) {
            return Err(HttpResponse::error(
                400,
                "InvalidRequest",
                format!("{} is a {}, not a subscription", nsid, def.kind()),
            ));
        }

        let params = decode_params(self.server.registry(), nsid, &request.query)
            .map_err(|e| error_response(&DispatchError::from(e)))?;

        let ip = request.client_ip().unwrap_or_else(|| "unknown".to_string());
        let subscriber = Subscriber::new(
            ip.clone(),
            request.header("User-Agent").map(str::to_string),
            params.clone(),
        );
        let guard = self.subscribers.admit(nsid, subscriber).ok_or_else(|| {
            HttpResponse::error(
                429,
                "TooManyRequests",
                format!("{} is already subscribed to {}", ip, nsid),
            )
        })?;

        let messages = self
            .server
            .subscribe(nsid, params)
            .await
            .map_err(|e| error_response(&e))?;

        Ok(SubscriptionSession::new(nsid, messages)
            .with_poll_interval(self.server.config().subscription_poll_interval)
            .with_guard(guard))
    }

    fn definition(&self, nsid: &str) -> Result<&Definition, HttpResponse> {
        if !is_valid_nsid(nsid) {
            return Err(HttpResponse::error(
                400,
                "InvalidRequest",
                format!("{} is not a valid NSID", nsid),
            ));
        }

        self.server.registry().get(nsid).ok_or_else(|| {
            HttpResponse::error(501, "MethodNotImplemented", format!("{} not found", nsid))
        })
    }
}

/// Decode the request body per the method's declared input encoding
fn read_input(method: &LexXrpcMethod, request: &HttpRequest) -> Result<XrpcBody, HttpResponse> {
    match &method.input {
        None if request.body.is_empty() => Ok(XrpcBody::Empty),
        Some(input) if !input.is_json() => {
            let declared = input.encoding.clone().unwrap_or_default();
            let actual = request.content_type();
            if !actual.is_some_and(|a| is_accepted_mime_type(a, &[declared.clone()])) {
                tracing::warn!(
                    "Expecting input encoding {}, request has Content-Type {}",
                    declared,
                    actual.unwrap_or("(none)")
                );
            }
            Ok(XrpcBody::Bytes {
                data: request.body.clone(),
                content_type: actual.map(str::to_string),
            })
        }
        _ if request.body.is_empty() => Ok(XrpcBody::Json(json!({}))),
        _ => serde_json::from_slice(&request.body)
            .map(XrpcBody::Json)
            .map_err(|e| {
                HttpResponse::error(400, "InvalidRequest", format!("Invalid JSON input: {}", e))
            }),
    }
}

/// Encode a handler outcome per the method's declared output encoding
fn write_output(method: &LexXrpcMethod, outcome: HandlerOutcome) -> HttpResponse {
    let output = match outcome {
        HandlerOutcome::Output(output) => output,
        HandlerOutcome::Redirect(redirect) => return redirect_response(redirect),
        HandlerOutcome::Error(error) => return named_response(&error),
    };

    let declared = method
        .output
        .as_ref()
        .and_then(|o| o.encoding.as_deref())
        .filter(|e| *e != JSON_ENCODING);

    match (declared, output) {
        (_, XrpcBody::Empty) => HttpResponse::new(200),
        (None, XrpcBody::Json(value)) => HttpResponse::json(200, &value),
        (Some(encoding), XrpcBody::Json(Value::String(text))) => {
            HttpResponse::bytes(200, text, encoding)
        }
        (Some(encoding), XrpcBody::Json(_)) => HttpResponse::error(
            500,
            "InternalServerError",
            format!("Expected bytes output to match {}, got JSON", encoding),
        ),
        (declared, XrpcBody::Bytes { data, content_type }) => {
            let content_type = declared
                .filter(|e| !e.contains('*'))
                .or(content_type.as_deref())
                .unwrap_or(OCTET_STREAM);
            HttpResponse::bytes(200, data, content_type)
        }
    }
}

fn redirect_response(redirect: Redirect) -> HttpResponse {
    let mut response = HttpResponse::new(redirect.status).with_header("Location", redirect.to);
    response.headers.extend(redirect.headers);
    response
}

fn named_response(error: &NamedError) -> HttpResponse {
    let mut response = HttpResponse::error(400, &error.name, error.message.clone());
    response.headers.extend(error.headers.iter().cloned());
    response
}

fn error_response(e: &DispatchError) -> HttpResponse {
    if let Some(named) = e.named() {
        return named_response(named);
    }
    if e.is_not_found() {
        return HttpResponse::error(501, "MethodNotImplemented", e.to_string());
    }

    match e {
        DispatchError::AlreadyRegistered(_) => {
            HttpResponse::error(500, "InternalServerError", e.to_string())
        }
        DispatchError::Handler(_) => {
            tracing::info!("Method raised: {}", e);
            HttpResponse::error(400, "InvalidRequest", e.to_string())
        }
        _ => HttpResponse::error(400, "InvalidRequest", e.to_string()),
    }
}
