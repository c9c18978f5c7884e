//! XRPC server for AT Protocol services
//!
//! [`XrpcServer`] dispatches calls to registered handlers, validating
//! parameters, input, and output against a [`lexicon::LexiconRegistry`].
//! [`XrpcEndpoint`] puts it behind a framework-agnostic HTTP boundary, and
//! [`SubscriptionSession`] streams subscription messages to any
//! [`FrameSink`].
//!
//! # Example
//!
//! ```rust
//! use lexicon::{LexiconRegistry, XrpcBody};
//! use serde_json::{json, Map, Value};
//! use xrpc_server::{HandlerOutcome, ServerConfig, XrpcServer};
//!
//! async fn echo(input: XrpcBody, _params: Map<String, Value>) -> anyhow::Result<HandlerOutcome> {
//!     Ok(HandlerOutcome::Output(input))
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = LexiconRegistry::from_dir("lexicons")?;
//! let mut server = XrpcServer::new(registry, ServerConfig::default());
//! server.register("io.example.echo", echo)?;
//!
//! let outcome = server
//!     .call("io.example.echo", json!({"text": "hi"}).into(), Map::new())
//!     .await?;
//! assert_eq!(outcome, HandlerOutcome::from(json!({"text": "hi"})));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatcher;
pub mod endpoint;
pub mod subscription;

pub use dispatcher::{
    DispatchError, HandlerOutcome, MessageStream, NamedError, Redirect, ServerConfig,
    SubscriptionHandler, XrpcHandler, XrpcServer, DEFAULT_POLL_INTERVAL,
    DEFAULT_REDIRECT_STATUS,
};
pub use endpoint::{HttpMethod, HttpRequest, HttpResponse, XrpcEndpoint, CORS_HEADERS};
pub use subscription::{
    FrameSink, SessionEnd, Subscriber, SubscriberGuard, Subscribers, SubscriptionSession,
};

pub use lexicon::XrpcBody;
