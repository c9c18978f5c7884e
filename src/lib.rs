//! Lexicon schema validation and XRPC client and server for AT Protocol
//!
//! This crate re-exports the workspace crates:
//!
//! - [`lexicon`]: schema registry, validator, parameter and frame codecs
//! - [`client`]: HTTP client with session handling and subscriptions
//! - [`server`]: call dispatcher, HTTP endpoint, and subscription serving

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use lexicon;
pub use xrpc_client as client;
pub use xrpc_server as server;

pub use lexicon::{
    LexiconError, LexiconRegistry, Slot, ValidationError, ValidationOptions, Validator, XrpcBody,
};
pub use xrpc_client::{Client, ClientConfig, ClientError, Session, XrpcError, XrpcRequest};
pub use xrpc_server::{
    DispatchError, HandlerOutcome, HttpRequest, HttpResponse, ServerConfig, XrpcEndpoint,
    XrpcServer,
};
