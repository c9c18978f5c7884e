//! Lexicon schema registry and validator
//!
//! This crate implements the schema side of the AT Protocol XRPC layer: a
//! registry of Lexicon definitions keyed by fully-qualified id, a recursive
//! validator that checks JSON values against those definitions, the string
//! format checkers, the query parameter codec shared by clients and servers,
//! and the DAG-CBOR frame codec used by subscriptions.
//!
//! Reference: <https://atproto.com/specs/lexicon>
//!
//! # Example
//!
//! ```rust
//! use lexicon::{LexiconRegistry, Slot, ValidationOptions, Validator};
//! use serde_json::json;
//!
//! let registry = LexiconRegistry::from_values(vec![json!({
//!     "lexicon": 1,
//!     "id": "io.example.echo",
//!     "defs": {
//!         "main": {
//!             "type": "procedure",
//!             "input": {
//!                 "encoding": "application/json",
//!                 "schema": {
//!                     "type": "object",
//!                     "required": ["text"],
//!                     "properties": {"text": {"type": "string"}}
//!                 }
//!             }
//!         }
//!     }
//! })])
//! .unwrap();
//!
//! let validator = Validator::new(registry, ValidationOptions::default());
//! let input = validator
//!     .validate("io.example.echo", Slot::Input, json!({"text": "hi"}))
//!     .unwrap();
//! assert_eq!(input, json!({"text": "hi"}));
//!
//! assert!(validator
//!     .validate("io.example.echo", Slot::Input, json!({}))
//!     .is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod body;
pub mod data;
pub mod defs;
pub mod formats;
pub mod frame;
pub mod params;
pub mod parsing;
pub mod registry;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use body::XrpcBody;
pub use data::{from_ipld, loggable, to_ipld, DataError};
pub use defs::{
    Definition, LexArray, LexBlob, LexBody, LexBoolean, LexBytes, LexInteger, LexNumber,
    LexObject, LexRecord, LexRef, LexString, LexSubscription, LexToken, LexUnion, LexXrpcError,
    LexXrpcMethod, LexiconDoc,
};
pub use formats::{check_format, is_valid_nsid, FormatError, StringFormat};
pub use frame::{decode_frame, encode_frame, FrameError};
pub use params::{decode_params, encode_params, parse_query, ParamsError};
pub use registry::{LexiconError, LexiconRegistry};
pub use validation::{is_accepted_mime_type, Slot, ValidationError, ValidationOptions, Validator};

/// MIME type of JSON bodies. Any other encoding is treated as opaque bytes.
pub const JSON_ENCODING: &str = "application/json";
