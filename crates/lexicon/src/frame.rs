//! Subscription frame codec
//!
//! Each event-stream message is two DAG-CBOR items back to back: a small
//! header map (`op`, and usually `t` naming the message type) followed by
//! the payload map. DAG-CBOR encoding is deterministic, so the same header
//! and payload always produce the same bytes.
//!
//! Reference: <https://atproto.com/specs/event-stream>
//!
//! # Example
//!
//! ```rust
//! use lexicon::{decode_frame, encode_frame};
//! use serde_json::json;
//!
//! let frame = encode_frame(&json!({"op": 1, "t": "#commit"}), &json!({"seq": 7})).unwrap();
//! let (header, payload) = decode_frame(&frame).unwrap();
//!
//! assert_eq!(header, json!({"op": 1, "t": "#commit"}));
//! assert_eq!(payload, json!({"seq": 7}));
//! ```

use super::data::{from_ipld, to_ipld, DataError};
use ipld_core::ipld::Ipld;
use serde_json::Value;
use std::io::Cursor;
use thiserror::Error;

/// Errors encoding or decoding frames
#[derive(Debug, Error)]
pub enum FrameError {
    /// Error encoding to DAG-CBOR
    #[error("CBOR encoding error: {0}")]
    Encoding(String),

    /// Error decoding from DAG-CBOR
    #[error("CBOR decoding error: {0}")]
    Decoding(String),

    /// Frame ends right after the header
    #[error("Frame has no payload")]
    MissingPayload,

    /// Bytes left over after the payload
    #[error("Frame has {0} trailing bytes")]
    TrailingBytes(usize),

    /// JSON value with no IPLD equivalent, or the reverse
    #[error(transparent)]
    Data(#[from] DataError),
}

/// Result type for frame operations
pub type Result<T> = std::result::Result<T, FrameError>;

/// Encode a header and payload into one binary frame
pub fn encode_frame(header: &Value, payload: &Value) -> Result<Vec<u8>> {
    let mut frame = encode_item(header)?;
    frame.extend(encode_item(payload)?);
    Ok(frame)
}

/// Decode a binary frame into `(header, payload)`
pub fn decode_frame(frame: &[u8]) -> Result<(Value, Value)> {
    let mut cursor = Cursor::new(frame);
    let header = decode_item(&mut cursor)?;
    if remaining(&cursor, frame) == 0 {
        return Err(FrameError::MissingPayload);
    }
    let payload = decode_item(&mut cursor)?;

    match remaining(&cursor, frame) {
        0 => Ok((header, payload)),
        extra => Err(FrameError::TrailingBytes(extra)),
    }
}

fn encode_item(value: &Value) -> Result<Vec<u8>> {
    let ipld = to_ipld(value)?;
    serde_ipld_dagcbor::to_vec(&ipld).map_err(|e| FrameError::Encoding(e.to_string()))
}

/// Decode exactly one item, leaving the cursor just past it
fn decode_item(cursor: &mut Cursor<&[u8]>) -> Result<Value> {
    let ipld: Ipld = serde_ipld_dagcbor::de::from_reader_once(cursor)
        .map_err(|e| FrameError::Decoding(e.to_string()))?;
    Ok(from_ipld(ipld)?)
}

fn remaining(cursor: &Cursor<&[u8]>, frame: &[u8]) -> usize {
    let consumed = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
    frame.len().saturating_sub(consumed)
}
