//! Subscription streams
//!
//! Subscriptions are long-lived websocket connections that deliver one
//! binary frame per event. The socket itself sits behind
//! [`SubscriptionConnector`] and [`FrameSource`], so any websocket library
//! can be plugged in; this module only turns frames into a lazily decoded
//! and validated stream.

use super::xrpc::{ClientError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use lexicon::{decode_frame, Validator};
use serde_json::Value;

/// An open subscription connection
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next binary frame
    ///
    /// Returns `Ok(None)` once the peer has closed the connection.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Opens subscription connections
#[async_trait]
pub trait SubscriptionConnector: Send + Sync {
    /// Connect to a `ws://` or `wss://` URL with the given request headers
    async fn connect(&self, url: &str, headers: &[(String, String)])
        -> Result<Box<dyn FrameSource>>;
}

/// Map an `http(s)://` URL to its websocket equivalent
pub fn websocket_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}

/// Decode and validate frames as `(header, payload)` pairs
///
/// Frames are pulled only as the stream is polled. The stream ends when the
/// connection closes, cleanly or not. A frame that fails to decode or
/// validate is yielded as an error and ends the stream.
pub fn decode_messages(
    source: Box<dyn FrameSource>,
    validator: Validator,
    nsid: String,
) -> BoxStream<'static, Result<(Value, Value)>> {
    stream::unfold(Some((source, validator, nsid)), |state| async move {
        let (mut source, validator, nsid) = state?;

        let frame = match source.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!("Subscription {} closed", nsid);
                return None;
            }
            Err(e) => {
                tracing::debug!("Subscription {} closed: {}", nsid, e);
                return None;
            }
        };

        match decode_message(&validator, &nsid, &frame) {
            Ok(message) => Some((Ok(message), Some((source, validator, nsid)))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

/// Raw frames, undecoded, until the connection closes
pub fn raw_frames(source: Box<dyn FrameSource>) -> BoxStream<'static, Vec<u8>> {
    stream::unfold(source, |mut source| async move {
        match source.next_frame().await {
            Ok(Some(frame)) => Some((frame, source)),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("Subscription closed: {}", e);
                None
            }
        }
    })
    .boxed()
}

fn decode_message(validator: &Validator, nsid: &str, frame: &[u8]) -> Result<(Value, Value)> {
    let (header, payload) = decode_frame(frame).map_err(ClientError::from)?;
    let payload = validator.validate_message(nsid, &header, payload)?;
    Ok((header, payload))
}
