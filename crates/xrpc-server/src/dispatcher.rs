//! Call dispatcher
//!
//! [`XrpcServer`] binds method NSIDs to handlers and runs each call through
//! the method's lexicon: parameters, then input, then the handler, then
//! output. The first failing step ends the call.
//!
//! Subscriptions go through [`XrpcServer::subscribe`] instead. Their
//! messages are validated one at a time, as the returned stream is polled.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use lexicon::{
    is_valid_nsid, loggable, Definition, LexBody, LexiconRegistry, ParamsError, Slot,
    ValidationError, ValidationOptions, Validator, XrpcBody,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP status for [`Redirect`]
pub const DEFAULT_REDIRECT_STATUS: u16 = 302;

/// How long a subscription send loop waits for a message before checking
/// that the peer is still there
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

// =============================================================================
// Errors
// =============================================================================

/// Dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No lexicon defines this NSID
    #[error("{0} not found")]
    NotFound(String),

    /// The method is defined but no handler is registered for it
    #[error("{0} not implemented")]
    NotImplemented(String),

    /// Not a syntactically valid NSID
    #[error("{0} is not a valid NSID")]
    InvalidNsid(String),

    /// A handler is already registered for this NSID
    #[error("{0} already registered")]
    AlreadyRegistered(String),

    /// The definition is the wrong kind for the operation
    #[error("{nsid} is a {kind}, not a {expected}")]
    WrongKind {
        /// Method NSID
        nsid: String,
        /// Actual definition kind
        kind: &'static str,
        /// What the caller needed
        expected: &'static str,
    },

    /// Parameters, input, output, or a message failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Query string parameters failed to decode
    #[error(transparent)]
    Params(#[from] ParamsError),

    /// A body declared as JSON isn't JSON
    #[error("{0}")]
    InvalidBody(String),

    /// The handler failed
    #[error("{0}")]
    Handler(anyhow::Error),
}

impl DispatchError {
    /// Whether the method itself is missing, as opposed to a bad call
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DispatchError::NotFound(_)
                | DispatchError::NotImplemented(_)
                | DispatchError::Validation(ValidationError::NotFound(_))
                | DispatchError::Params(ParamsError::NotFound(_))
        )
    }

    /// The named error a handler failed with, if any
    pub fn named(&self) -> Option<&NamedError> {
        match self {
            DispatchError::Handler(e) => e.downcast_ref::<NamedError>(),
            _ => None,
        }
    }
}

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

// =============================================================================
// Configuration
// =============================================================================

/// Server configuration
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Validation mode for params, input, output, and messages
    pub validation: ValidationOptions,

    /// Subscription send loop poll interval
    pub subscription_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            validation: ValidationOptions::default(),
            subscription_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ServerConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the validation mode
    pub fn with_validation(mut self, validation: ValidationOptions) -> Self {
        self.validation = validation;
        self
    }

    /// Set the subscription poll interval
    pub fn with_subscription_poll_interval(mut self, interval: Duration) -> Self {
        self.subscription_poll_interval = interval;
        self
    }
}

// =============================================================================
// Handler Outcomes
// =============================================================================

/// Tells the transport to answer with an HTTP redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Target URL
    pub to: String,
    /// HTTP status, 302 by default
    pub status: u16,
    /// Extra response headers
    pub headers: Vec<(String, String)>,
}

impl Redirect {
    /// Redirect to a URL with the default status
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            status: DEFAULT_REDIRECT_STATUS,
            headers: Vec::new(),
        }
    }

    /// Set the HTTP status
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Add a response header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A method-specific error, eg `RepoNotFound`
///
/// Handlers can return one as [`HandlerOutcome::Error`] or raise it through
/// `anyhow`; either way the name reaches the client unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct NamedError {
    /// Short machine-readable name
    pub name: String,
    /// Human-readable message
    pub message: String,
    /// Extra response headers
    pub headers: Vec<(String, String)>,
}

impl NamedError {
    /// Create a named error
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            headers: Vec::new(),
        }
    }

    /// Add a response header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// What a handler produced
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Output body, validated against the method's output schema
    Output(XrpcBody),
    /// Redirect, passed through without validation
    Redirect(Redirect),
    /// Named error, passed through without validation
    Error(NamedError),
}

impl HandlerOutcome {
    /// No output
    pub fn empty() -> Self {
        HandlerOutcome::Output(XrpcBody::Empty)
    }

    /// The output body, if this is an output
    pub fn output(&self) -> Option<&XrpcBody> {
        match self {
            HandlerOutcome::Output(body) => Some(body),
            _ => None,
        }
    }
}

impl From<Value> for HandlerOutcome {
    fn from(value: Value) -> Self {
        HandlerOutcome::Output(XrpcBody::Json(value))
    }
}

impl From<XrpcBody> for HandlerOutcome {
    fn from(body: XrpcBody) -> Self {
        HandlerOutcome::Output(body)
    }
}

impl From<Redirect> for HandlerOutcome {
    fn from(redirect: Redirect) -> Self {
        HandlerOutcome::Redirect(redirect)
    }
}

impl From<NamedError> for HandlerOutcome {
    fn from(error: NamedError) -> Self {
        HandlerOutcome::Error(error)
    }
}

// =============================================================================
// Handler Traits
// =============================================================================

/// Implements one query or procedure
#[async_trait]
pub trait XrpcHandler: Send + Sync {
    /// Handle a call with validated input and decoded parameters
    async fn handle(
        &self,
        input: XrpcBody,
        params: Map<String, Value>,
    ) -> anyhow::Result<HandlerOutcome>;
}

#[async_trait]
impl<F, Fut> XrpcHandler for F
where
    F: Fn(XrpcBody, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerOutcome>> + Send + 'static,
{
    async fn handle(
        &self,
        input: XrpcBody,
        params: Map<String, Value>,
    ) -> anyhow::Result<HandlerOutcome> {
        (self)(input, params).await
    }
}

/// Stream of `(header, payload)` messages from a subscription handler
pub type MessageStream = BoxStream<'static, anyhow::Result<(Value, Value)>>;

/// Implements one subscription
#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    /// Start producing messages for a subscriber
    async fn subscribe(&self, params: Map<String, Value>) -> anyhow::Result<MessageStream>;
}

#[async_trait]
impl<F, Fut> SubscriptionHandler for F
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<MessageStream>> + Send + 'static,
{
    async fn subscribe(&self, params: Map<String, Value>) -> anyhow::Result<MessageStream> {
        (self)(params).await
    }
}

#[derive(Clone)]
enum Handler {
    Method(Arc<dyn XrpcHandler>),
    Subscription(Arc<dyn SubscriptionHandler>),
}

// =============================================================================
// Server
// =============================================================================

/// XRPC method dispatcher
///
/// Register handlers up front, then share the server (usually behind an
/// `Arc`) with the transport. Calls don't lock anything; concurrency comes
/// from the transport.
pub struct XrpcServer {
    validator: Validator,
    config: ServerConfig,
    handlers: HashMap<String, Handler>,
}

impl XrpcServer {
    /// Create a server over a registry
    pub fn new(registry: impl Into<Arc<LexiconRegistry>>, config: ServerConfig) -> Self {
        Self {
            validator: Validator::with_shared(registry.into(), config.validation),
            config,
            handlers: HashMap::new(),
        }
    }

    /// Get the registry
    pub fn registry(&self) -> &LexiconRegistry {
        self.validator.registry()
    }

    /// Get the validator
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind a handler to a query or procedure
    ///
    /// Fails if the NSID is invalid, undefined, not a query or procedure, or
    /// already has a handler.
    pub fn register<H>(&mut self, nsid: impl Into<String>, handler: H) -> Result<()>
    where
        H: XrpcHandler + 'static,
    {
        let nsid = nsid.into();
        self.check_registration(&nsid, false)?;
        tracing::debug!("Registered {}", nsid);
        self.handlers.insert(nsid, Handler::Method(Arc::new(handler)));
        Ok(())
    }

    /// Bind a handler to a subscription
    pub fn register_subscription<H>(&mut self, nsid: impl Into<String>, handler: H) -> Result<()>
    where
        H: SubscriptionHandler + 'static,
    {
        let nsid = nsid.into();
        self.check_registration(&nsid, true)?;
        tracing::debug!("Registered subscription {}", nsid);
        self.handlers
            .insert(nsid, Handler::Subscription(Arc::new(handler)));
        Ok(())
    }

    /// Whether a handler is registered for an NSID
    pub fn is_registered(&self, nsid: &str) -> bool {
        self.handlers.contains_key(nsid)
    }

    /// NSIDs with registered handlers
    pub fn nsids(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run a query or procedure
    ///
    /// Validates `params` and JSON `input`, runs the handler, and validates
    /// JSON output. Binary input and output pass through. Redirects and
    /// named errors skip output validation.
    pub async fn call(
        &self,
        nsid: &str,
        input: XrpcBody,
        params: Map<String, Value>,
    ) -> Result<HandlerOutcome> {
        let logged_params = loggable(&Value::Object(params.clone()));
        tracing::debug!("{}: {} {}", nsid, logged_params, input.loggable());

        let handler = match self.handlers.get(nsid) {
            Some(Handler::Method(handler)) => Arc::clone(handler),
            Some(Handler::Subscription(_)) => {
                return Err(DispatchError::WrongKind {
                    nsid: nsid.to_string(),
                    kind: "subscription",
                    expected: "query or procedure",
                })
            }
            None => return Err(self.missing(nsid)),
        };

        let params = self.validate_params(nsid, params)?;
        let input = self.validate_body(nsid, Slot::Input, input)?;

        tracing::debug!("Running method {}", nsid);
        let outcome = match handler.handle(input, params).await {
            Ok(outcome) => outcome,
            Err(e) => match e.downcast::<NamedError>() {
                Ok(named) => HandlerOutcome::Error(named),
                Err(e) => return Err(DispatchError::Handler(e)),
            },
        };

        match outcome {
            HandlerOutcome::Output(output) => {
                tracing::debug!("Got: {}", output.loggable());
                let output = self.validate_body(nsid, Slot::Output, output)?;
                Ok(HandlerOutcome::Output(output))
            }
            other => Ok(other),
        }
    }

    /// Start a subscription
    ///
    /// Parameters are validated now. Each message payload is validated when
    /// the returned stream yields it; an invalid message comes out as an
    /// error item.
    pub async fn subscribe(
        &self,
        nsid: &str,
        params: Map<String, Value>,
    ) -> Result<BoxStream<'static, Result<(Value, Value)>>> {
        let logged_params = loggable(&Value::Object(params.clone()));
        tracing::debug!("{}: subscribe {}", nsid, logged_params);

        let handler = match self.handlers.get(nsid) {
            Some(Handler::Subscription(handler)) => Arc::clone(handler),
            Some(Handler::Method(_)) => {
                return Err(DispatchError::WrongKind {
                    nsid: nsid.to_string(),
                    kind: self.registry().get(nsid).map_or("method", Definition::kind),
                    expected: "subscription",
                })
            }
            None => return Err(self.missing(nsid)),
        };

        let params = self.validate_params(nsid, params)?;
        let messages = handler.subscribe(params).await.map_err(DispatchError::Handler)?;

        let validator = self.validator.clone();
        let nsid = nsid.to_string();
        Ok(messages
            .map(move |message| {
                let (header, payload) = message.map_err(DispatchError::Handler)?;
                let payload = validator.validate_message(&nsid, &header, payload)?;
                Ok((header, payload))
            })
            .boxed())
    }

    fn check_registration(&self, nsid: &str, subscription: bool) -> Result<()> {
        if !is_valid_nsid(nsid) {
            return Err(DispatchError::InvalidNsid(nsid.to_string()));
        }
        if self.handlers.contains_key(nsid) {
            return Err(DispatchError::AlreadyRegistered(nsid.to_string()));
        }

        let def = self
            .registry()
            .get(nsid)
            .ok_or_else(|| DispatchError::NotFound(nsid.to_string()))?;

        let matches = match def {
            Definition::Query(_) | Definition::Procedure(_) => !subscription,
            Definition::Subscription(_) => subscription,
            _ => false,
        };
        if !matches {
            return Err(DispatchError::WrongKind {
                nsid: nsid.to_string(),
                kind: def.kind(),
                expected: if subscription {
                    "subscription"
                } else {
                    "query or procedure"
                },
            });
        }

        Ok(())
    }

    fn missing(&self, nsid: &str) -> DispatchError {
        if self.registry().contains(nsid) {
            DispatchError::NotImplemented(nsid.to_string())
        } else {
            DispatchError::NotFound(nsid.to_string())
        }
    }

    fn validate_params(&self, nsid: &str, params: Map<String, Value>) -> Result<Map<String, Value>> {
        match self
            .validator
            .validate(nsid, Slot::Parameters, Value::Object(params))?
        {
            Value::Object(params) => Ok(params),
            _ => Ok(Map::new()),
        }
    }

    /// Validate JSON bodies; no body counts as `null`
    ///
    /// Raw bytes for a slot declared as JSON are parsed and validated like
    /// any other JSON body.
    fn validate_body(&self, nsid: &str, slot: Slot, body: XrpcBody) -> Result<XrpcBody> {
        match body {
            XrpcBody::Json(value) => Ok(XrpcBody::Json(self.validator.validate(nsid, slot, value)?)),
            XrpcBody::Empty => {
                self.validator.validate(nsid, slot, Value::Null)?;
                Ok(XrpcBody::Empty)
            }
            XrpcBody::Bytes { data, .. } if self.declares_json(nsid, slot) => {
                let value = serde_json::from_slice(&data).map_err(|e| {
                    DispatchError::InvalidBody(format!("Invalid JSON {}: {}", slot, e))
                })?;
                Ok(XrpcBody::Json(self.validator.validate(nsid, slot, value)?))
            }
            bytes => Ok(bytes),
        }
    }

    fn declares_json(&self, nsid: &str, slot: Slot) -> bool {
        self.validator.options().is_enabled()
            && self
                .validator
                .declared_body(nsid, slot)
                .is_some_and(LexBody::is_json)
    }
}

impl fmt::Debug for XrpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nsids: Vec<_> = self.nsids().collect();
        nsids.sort_unstable();
        f.debug_struct("XrpcServer")
            .field("config", &self.config)
            .field("handlers", &nsids)
            .finish()
    }
}
