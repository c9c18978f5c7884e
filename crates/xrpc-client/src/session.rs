//! Client session state
//!
//! The session is the access/refresh token pair returned by
//! `com.atproto.server.createSession` and `com.atproto.server.refreshSession`.
//! It's shared by every clone of a [`crate::Client`], so a refresh made by one
//! call is seen by the next.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use xrpc_client::session::Session;
//!
//! let session = Session::from_output(&json!({
//!     "accessJwt": "access",
//!     "refreshJwt": "refresh",
//!     "handle": "alice.example.com",
//!     "did": "did:plc:abc123",
//!     "active": true,
//! }))
//! .unwrap();
//!
//! assert_eq!(session.did.as_deref(), Some("did:plc:abc123"));
//! assert_eq!(session.extra["active"], json!(true));
//! ```

use super::xrpc::REFRESH_NSID;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Tokens and identity from a login or refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Access JWT, sent with ordinary calls
    pub access_jwt: String,

    /// Refresh JWT, sent only with the refresh call
    pub refresh_jwt: String,

    /// Account DID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,

    /// Account handle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,

    /// Any other fields the server returned
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    /// Session holding only a token pair
    pub fn new(access_jwt: impl Into<String>, refresh_jwt: impl Into<String>) -> Self {
        Self {
            access_jwt: access_jwt.into(),
            refresh_jwt: refresh_jwt.into(),
            did: None,
            handle: None,
            extra: Map::new(),
        }
    }

    /// Parse a login or refresh output
    ///
    /// Returns `None` if the output doesn't carry both tokens.
    pub fn from_output(output: &Value) -> Option<Self> {
        serde_json::from_value(output.clone()).ok()
    }
}

/// What happened to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Login succeeded
    Created,
    /// Tokens were refreshed
    Refreshed,
    /// Login or refresh failed, or the session was cleared explicitly
    Cleared,
}

/// Callback function type for session events
pub type SessionCallback = Arc<dyn Fn(SessionEvent, Option<&Session>) + Send + Sync>;

/// Shared, mutable session slot
#[derive(Clone, Default)]
pub struct SessionStore {
    session: Arc<RwLock<Option<Session>>>,
    callback: Option<SessionCallback>,
}

impl SessionStore {
    /// Create a store, optionally holding a session already
    pub fn new(initial: Option<Session>) -> Self {
        Self {
            session: Arc::new(RwLock::new(initial)),
            callback: None,
        }
    }

    /// Set the callback fired on every session change
    pub fn set_callback(&mut self, callback: SessionCallback) {
        self.callback = Some(callback);
    }

    /// Current session, if any
    pub fn get(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Whether a session is held
    pub fn is_active(&self) -> bool {
        self.session.read().is_some()
    }

    /// Replace the session and notify
    pub fn set(&self, session: Session, event: SessionEvent) {
        *self.session.write() = Some(session.clone());
        self.notify(event, Some(&session));
    }

    /// Drop the session and notify
    pub fn clear(&self) {
        *self.session.write() = None;
        self.notify(SessionEvent::Cleared, None);
    }

    /// Bearer token for a call: the refresh token for the refresh call,
    /// otherwise the access token
    pub fn token_for(&self, nsid: &str) -> Option<String> {
        let session = self.session.read();
        session.as_ref().map(|s| {
            if nsid == REFRESH_NSID {
                s.refresh_jwt.clone()
            } else {
                s.access_jwt.clone()
            }
        })
    }

    fn notify(&self, event: SessionEvent, session: Option<&Session>) {
        if let Some(callback) = &self.callback {
            callback(event, session);
        }
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("active", &self.is_active())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
