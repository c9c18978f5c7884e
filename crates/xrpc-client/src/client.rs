//! XRPC client
//!
//! [`Client::call`] runs one query or procedure:
//!
//! 1. drop null parameters, validate the rest, and encode them into the URL
//! 2. validate JSON input
//! 3. send with GET for queries, POST for procedures
//! 4. store or clear the session if this was the login or refresh call
//! 5. on a token error, refresh the session and retry once
//! 6. validate JSON output; other encodings come back as raw bytes

use super::session::{Session, SessionCallback, SessionEvent, SessionStore};
use super::subscription::{self, SubscriptionConnector};
use super::xrpc::{
    ClientConfig, ClientError, Result, XrpcError, XrpcRequest, LOGIN_NSID, REFRESH_NSID,
};
use futures::stream::BoxStream;
use lexicon::{
    encode_params, loggable, Definition, LexBody, LexiconRegistry, Slot, Validator, XrpcBody,
    JSON_ENCODING,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Which HTTP shape a method takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MethodKind {
    Query,
    Procedure,
    Subscription,
}

impl MethodKind {
    fn as_str(&self) -> &'static str {
        match self {
            MethodKind::Query => "query",
            MethodKind::Procedure => "procedure",
            MethodKind::Subscription => "subscription",
        }
    }
}

/// XRPC client for one server
///
/// Clones share the HTTP connection pool and the session.
///
/// # Examples
/// ```no_run
/// use lexicon::LexiconRegistry;
/// use serde_json::json;
/// use xrpc_client::{Client, ClientConfig, XrpcRequest};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = LexiconRegistry::from_dir("lexicons")?;
///     let client = Client::new(registry, ClientConfig::new("https://bsky.social"))?;
///
///     client
///         .call(XrpcRequest::new("com.atproto.server.createSession").input(json!({
///             "identifier": "alice.bsky.social",
///             "password": "hunter2",
///         })))
///         .await?;
///
///     let timeline = client
///         .call(XrpcRequest::new("app.bsky.feed.getTimeline").param("limit", 10))
///         .await?;
///     println!("{:?}", timeline.as_json());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
    validator: Validator,
    session: SessionStore,
    connector: Option<Arc<dyn SubscriptionConnector>>,
}

impl Client {
    /// Create a client over a registry
    pub fn new(registry: impl Into<Arc<LexiconRegistry>>, config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let validator = Validator::with_shared(registry.into(), config.validation);

        let initial = match (&config.access_token, &config.refresh_token) {
            (None, None) => None,
            (access, refresh) => Some(Session::new(
                access.clone().unwrap_or_default(),
                refresh.clone().unwrap_or_default(),
            )),
        };

        Ok(Self {
            http,
            config,
            validator,
            session: SessionStore::new(initial),
            connector: None,
        })
    }

    /// Use a connector for subscriptions
    pub fn with_connector(mut self, connector: Arc<dyn SubscriptionConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Get notified whenever the session is stored, refreshed, or cleared
    pub fn on_session_change<F>(&mut self, callback: F)
    where
        F: Fn(SessionEvent, Option<&Session>) + Send + Sync + 'static,
    {
        let callback: SessionCallback = Arc::new(callback);
        self.session.set_callback(callback);
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the validator
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Current session, if logged in
    pub fn session(&self) -> Option<Session> {
        self.session.get()
    }

    /// Replace the session, eg one restored from storage
    pub fn set_session(&self, session: Session) {
        self.session.set(session, SessionEvent::Created);
    }

    /// Log out locally
    pub fn clear_session(&self) {
        self.session.clear();
    }

    /// Run a query or procedure
    pub async fn call(&self, request: XrpcRequest) -> Result<XrpcBody> {
        let kind = self.method_kind(&request.nsid)?;
        if kind == MethodKind::Subscription {
            return Err(ClientError::WrongKind {
                nsid: request.nsid,
                kind: kind.as_str(),
                expected: "query or procedure",
            });
        }

        match self.send(&request, kind).await {
            Err(ClientError::Xrpc(e)) if e.is_token_error() && self.can_refresh(&request.nsid) => {
                tracing::debug!("{} failed with {}, refreshing session", request.nsid, e.error());
                self.refresh_session().await?;
                self.send(&request, kind).await
            }
            result => result,
        }
    }

    /// Exchange the refresh token for a new session
    pub async fn refresh_session(&self) -> Result<XrpcBody> {
        let request = XrpcRequest::new(REFRESH_NSID);
        let kind = self.method_kind(REFRESH_NSID)?;
        self.send(&request, kind).await
    }

    /// Open a subscription and decode its messages
    ///
    /// Each payload is validated against the method's `message` schema as
    /// it arrives. The stream ends when the server closes the connection.
    pub async fn subscribe(
        &self,
        request: XrpcRequest,
    ) -> Result<BoxStream<'static, Result<(Value, Value)>>> {
        let source = self.connect(&request).await?;
        Ok(subscription::decode_messages(
            source,
            self.validator.clone(),
            request.nsid,
        ))
    }

    /// Open a subscription and yield its raw binary frames
    pub async fn subscribe_raw(&self, request: XrpcRequest) -> Result<BoxStream<'static, Vec<u8>>> {
        let source = self.connect(&request).await?;
        Ok(subscription::raw_frames(source))
    }

    fn method_kind(&self, nsid: &str) -> Result<MethodKind> {
        match self.validator.registry().get(nsid) {
            Some(Definition::Query(_)) => Ok(MethodKind::Query),
            Some(Definition::Procedure(_)) => Ok(MethodKind::Procedure),
            Some(Definition::Subscription(_)) => Ok(MethodKind::Subscription),
            Some(other) => Err(ClientError::WrongKind {
                nsid: nsid.to_string(),
                kind: other.kind(),
                expected: "method",
            }),
            None => Err(ClientError::NotFound(nsid.to_string())),
        }
    }

    fn can_refresh(&self, nsid: &str) -> bool {
        self.session.is_active()
            && nsid != LOGIN_NSID
            && nsid != REFRESH_NSID
            && !nsid.starts_with("com.atproto.identity.")
    }

    /// Validate and encode parameters into a method URL
    fn url(&self, request: &XrpcRequest) -> Result<String> {
        let params: Map<String, Value> = request
            .params
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let params = self
            .validator
            .validate(&request.nsid, Slot::Parameters, Value::Object(params))?;

        let mut url = self.config.method_url(&request.nsid);
        if let Value::Object(params) = &params {
            let query = encode_params(params);
            if !query.is_empty() {
                url.push('?');
                url.push_str(&query);
            }
        }
        Ok(url)
    }

    fn headers(
        &self,
        nsid: &str,
        content_type: Option<&str>,
        extra: &[(String, String)],
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&self.config.user_agent)?);
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, header_value(content_type)?);
        }

        for (name, value) in self.config.headers.iter().chain(extra) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::InvalidHeader(format!("{}: {}", name, e)))?;
            headers.insert(name, header_value(value)?);
        }

        if let Some(token) = self.session.token_for(nsid).filter(|t| !t.is_empty()) {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
        }

        Ok(headers)
    }

    /// Whether raw bytes sent to `nsid` should be parsed and validated as JSON
    fn declares_json_input(&self, nsid: &str) -> bool {
        self.validator.options().is_enabled()
            && self
                .validator
                .declared_body(nsid, Slot::Input)
                .is_some_and(LexBody::is_json)
    }

    /// Content type for a request body: JSON, or the method's declared
    /// input encoding for binary bodies
    fn request_content_type<'a>(&'a self, nsid: &str, input: &'a XrpcBody) -> Option<&'a str> {
        match input {
            XrpcBody::Bytes { content_type, .. } => self
                .validator
                .declared_body(nsid, Slot::Input)
                .and_then(|i| i.encoding.as_deref())
                .filter(|e| !e.contains('*'))
                .or(content_type.as_deref()),
            _ => Some(JSON_ENCODING),
        }
    }

    async fn send(&self, request: &XrpcRequest, kind: MethodKind) -> Result<XrpcBody> {
        let nsid = request.nsid.as_str();
        let url = self.url(request)?;

        let input = match &request.input {
            XrpcBody::Json(value) => {
                XrpcBody::Json(self.validator.validate(nsid, Slot::Input, value.clone())?)
            }
            XrpcBody::Bytes { data, .. } if self.declares_json_input(nsid) => {
                let value = serde_json::from_slice(data)
                    .map_err(|e| ClientError::InvalidInput(e.to_string()))?;
                XrpcBody::Json(self.validator.validate(nsid, Slot::Input, value)?)
            }
            other => other.clone(),
        };

        let content_type = self.request_content_type(nsid, &input);
        let headers = self.headers(nsid, content_type, &request.headers)?;

        let logged_params = loggable(&Value::Object(request.params.clone()));
        tracing::debug!(
            "{} {} {} {}",
            kind.as_str(),
            url,
            logged_params,
            input.loggable()
        );

        let builder = match kind {
            MethodKind::Query => self.http.get(&url),
            _ => self.http.post(&url),
        }
        .headers(headers);

        let builder = match input {
            XrpcBody::Json(value) => builder.body(value.to_string()),
            XrpcBody::Bytes { data, .. } => builder.body(data),
            XrpcBody::Empty => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string());
        let body = response.bytes().await?;

        let output = if body.is_empty() {
            XrpcBody::Empty
        } else if content_type.as_deref() == Some(JSON_ENCODING) {
            match serde_json::from_slice(&body) {
                Ok(value) => XrpcBody::Json(value),
                Err(e) if status.is_success() => {
                    return Err(ClientError::InvalidResponse(e.to_string()))
                }
                Err(_) => XrpcBody::Empty,
            }
        } else {
            XrpcBody::Bytes {
                data: body.to_vec(),
                content_type,
            }
        };

        if nsid == LOGIN_NSID || nsid == REFRESH_NSID {
            self.store_session(nsid, status.is_success(), output.as_json());
        }

        if !status.is_success() {
            tracing::debug!("Got {}: {}", status, String::from_utf8_lossy(&body));
            return Err(XrpcError::from_response(status.as_u16(), &body).into());
        }

        match output {
            XrpcBody::Json(value) => Ok(XrpcBody::Json(
                self.validator.validate(nsid, Slot::Output, value)?,
            )),
            XrpcBody::Empty => {
                self.validator.validate(nsid, Slot::Output, Value::Null)?;
                Ok(XrpcBody::Empty)
            }
            bytes => Ok(bytes),
        }
    }

    fn store_session(&self, nsid: &str, ok: bool, output: Option<&Value>) {
        match output.filter(|_| ok).and_then(Session::from_output) {
            Some(session) => {
                tracing::debug!(
                    "Logged in as {}, storing session",
                    session.did.as_deref().unwrap_or("(unknown)")
                );
                let event = if nsid == REFRESH_NSID {
                    SessionEvent::Refreshed
                } else {
                    SessionEvent::Created
                };
                self.session.set(session, event);
            }
            None => {
                tracing::debug!("{} failed, clearing session", nsid);
                self.session.clear();
            }
        }
    }

    async fn connect(&self, request: &XrpcRequest) -> Result<Box<dyn subscription::FrameSource>> {
        let kind = self.method_kind(&request.nsid)?;
        if kind != MethodKind::Subscription {
            return Err(ClientError::WrongKind {
                nsid: request.nsid.clone(),
                kind: kind.as_str(),
                expected: "subscription",
            });
        }

        let connector = self
            .connector
            .as_ref()
            .ok_or_else(|| ClientError::Connect("no subscription connector configured".into()))?;

        let url = subscription::websocket_url(&self.url(request)?);
        let mut headers = vec![("User-Agent".to_string(), self.config.user_agent.clone())];
        headers.extend(self.config.headers.iter().cloned());
        headers.extend(request.headers.iter().cloned());
        if let Some(token) = self.session.token_for(&request.nsid).filter(|t| !t.is_empty()) {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }

        tracing::debug!("Connecting to {}", url);
        connector.connect(&url, &headers).await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("connector", &self.connector.is_some())
            .finish()
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ClientError::InvalidHeader(format!("{}: {}", value, e)))
}
