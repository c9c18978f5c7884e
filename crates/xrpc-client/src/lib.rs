//! XRPC client for AT Protocol services
//!
//! [`Client`] calls queries and procedures over HTTP, validating parameters,
//! input, and output against a [`lexicon::LexiconRegistry`]. It stores the
//! session from `com.atproto.server.createSession`, sends its tokens with
//! later calls, and transparently refreshes an expired access token once
//! per call.
//!
//! Subscriptions decode binary event-stream frames into `(header, payload)`
//! pairs; the websocket itself is supplied through
//! [`subscription::SubscriptionConnector`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod session;
pub mod subscription;
pub mod xrpc;

pub use client::Client;
pub use session::{Session, SessionCallback, SessionEvent};
pub use subscription::{FrameSource, SubscriptionConnector};
pub use xrpc::{
    ClientConfig, ClientError, XrpcError, XrpcRequest, DEFAULT_PDS, LOGIN_NSID, REFRESH_NSID,
    TOKEN_ERRORS,
};

pub use lexicon::XrpcBody;
