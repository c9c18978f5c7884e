//! Subscription serving
//!
//! [`Subscribers`] tracks who is connected to each subscription and turns
//! away a second connection from the same address. [`SubscriptionSession`]
//! is the send loop for one connection: it pulls messages from the handler,
//! encodes them as frames, and writes them to a [`FrameSink`], checking for
//! a disconnected peer whenever the handler goes quiet.

use super::dispatcher::{DispatchError, DEFAULT_POLL_INTERVAL};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use lexicon::encode_frame;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Subscribers
// =============================================================================

/// One connected subscriber
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscriber {
    /// Client address
    pub ip: String,
    /// Client `User-Agent`
    pub user_agent: Option<String>,
    /// Decoded subscription parameters
    pub params: Map<String, Value>,
    /// When the subscriber connected
    pub start: DateTime<Utc>,
}

impl Subscriber {
    /// Create a subscriber record starting now
    pub fn new(ip: impl Into<String>, user_agent: Option<String>, params: Map<String, Value>) -> Self {
        Self {
            ip: ip.into(),
            user_agent,
            params,
            start: Utc::now(),
        }
    }
}

/// Active subscribers, per subscription NSID
///
/// Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<HashMap<String, Vec<Subscriber>>>>,
}

impl Subscribers {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber unless one from the same address is already
    /// connected to `nsid`
    ///
    /// The subscriber stays in the set until the returned guard is dropped.
    pub fn admit(&self, nsid: &str, subscriber: Subscriber) -> Option<SubscriberGuard> {
        let mut inner = self.inner.lock();
        let current = inner.entry(nsid.to_string()).or_default();
        if current.iter().any(|s| s.ip == subscriber.ip) {
            tracing::info!(
                "Rejecting {} subscriber {}, already connected",
                nsid,
                subscriber.ip
            );
            return None;
        }

        tracing::info!(
            "New {} subscriber {} {}",
            nsid,
            subscriber.ip,
            subscriber.user_agent.as_deref().unwrap_or("")
        );
        let ip = subscriber.ip.clone();
        current.push(subscriber);

        Some(SubscriberGuard {
            subscribers: self.clone(),
            nsid: nsid.to_string(),
            ip,
        })
    }

    /// Current subscribers to `nsid`
    pub fn list(&self, nsid: &str) -> Vec<Subscriber> {
        self.inner.lock().get(nsid).cloned().unwrap_or_default()
    }

    /// Number of subscribers to `nsid`
    pub fn count(&self, nsid: &str) -> usize {
        self.inner.lock().get(nsid).map_or(0, Vec::len)
    }

    fn remove(&self, nsid: &str, ip: &str) {
        let mut inner = self.inner.lock();
        if let Some(current) = inner.get_mut(nsid) {
            current.retain(|s| s.ip != ip);
            if current.is_empty() {
                inner.remove(nsid);
            }
        }
    }
}

/// Keeps a subscriber registered
///
/// When dropped, the subscriber is removed.
#[derive(Debug)]
pub struct SubscriberGuard {
    subscribers: Subscribers,
    nsid: String,
    ip: String,
}

impl SubscriberGuard {
    /// Subscription NSID
    pub fn nsid(&self) -> &str {
        &self.nsid
    }

    /// Subscriber address
    pub fn ip(&self) -> &str {
        &self.ip
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        tracing::info!("Closed {} subscriber {}", self.nsid, self.ip);
        self.subscribers.remove(&self.nsid, &self.ip);
    }
}

// =============================================================================
// Send Loop
// =============================================================================

/// Outgoing side of a subscription connection, eg a websocket
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSink: Send {
    /// Whether the peer is still connected
    fn is_connected(&self) -> bool;

    /// Send one binary frame
    async fn send(&mut self, frame: Vec<u8>) -> anyhow::Result<()>;
}

/// How a send loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The handler ran out of messages
    Finished,
    /// The peer went away
    Disconnected,
    /// The handler, validation, or encoding failed
    Failed,
}

/// One admitted subscription connection, ready to stream
pub struct SubscriptionSession {
    nsid: String,
    messages: BoxStream<'static, Result<(Value, Value), DispatchError>>,
    poll_interval: Duration,
    guard: Option<SubscriberGuard>,
}

impl SubscriptionSession {
    /// Wrap a validated message stream
    pub fn new(
        nsid: impl Into<String>,
        messages: BoxStream<'static, Result<(Value, Value), DispatchError>>,
    ) -> Self {
        Self {
            nsid: nsid.into(),
            messages,
            poll_interval: DEFAULT_POLL_INTERVAL,
            guard: None,
        }
    }

    /// Set how long to wait for a message before checking the peer
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Hold a subscriber registration for as long as the session lives
    pub fn with_guard(mut self, guard: SubscriberGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Subscription NSID
    pub fn nsid(&self) -> &str {
        &self.nsid
    }

    /// Stream messages to `sink` until the handler finishes, the peer
    /// disconnects, or something fails
    ///
    /// Each frame is the DAG-CBOR header followed by the DAG-CBOR payload.
    /// The subscriber registration is released when this returns.
    pub async fn run<S>(mut self, sink: &mut S) -> SessionEnd
    where
        S: FrameSink + ?Sized,
    {
        loop {
            let next = match tokio::time::timeout(self.poll_interval, self.messages.next()).await {
                Ok(next) => next,
                Err(_) => {
                    if sink.is_connected() {
                        continue;
                    }
                    tracing::debug!("{} peer went away while waiting", self.nsid);
                    return SessionEnd::Disconnected;
                }
            };

            let (header, payload) = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    tracing::error!("{} subscription failed: {}", self.nsid, e);
                    return SessionEnd::Failed;
                }
                None => {
                    tracing::debug!("{} subscription finished", self.nsid);
                    return SessionEnd::Finished;
                }
            };

            let frame = match encode_frame(&header, &payload) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("Couldn't encode {} message: {}", self.nsid, e);
                    return SessionEnd::Failed;
                }
            };

            if !sink.is_connected() {
                return SessionEnd::Disconnected;
            }
            if let Err(e) = sink.send(frame).await {
                tracing::debug!("{} send failed: {}", self.nsid, e);
                return SessionEnd::Disconnected;
            }
        }
    }
}

impl fmt::Debug for SubscriptionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSession")
            .field("nsid", &self.nsid)
            .field("poll_interval", &self.poll_interval)
            .field("guard", &self.guard)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use lexicon::decode_frame;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn subscriber(ip: &str) -> Subscriber {
        Subscriber::new(ip, Some("test/1.0".to_string()), Map::new())
    }

    fn messages(
        items: Vec<Result<(Value, Value), DispatchError>>,
    ) -> BoxStream<'static, Result<(Value, Value), DispatchError>> {
        stream::iter(items).boxed()
    }

    fn message(num: i64) -> Result<(Value, Value), DispatchError> {
        Ok((json!({"op": 1, "t": "#num"}), json!({"num": num})))
    }

    // ===== Subscribers =====

    #[test]
    fn test_admit_once_per_ip() {
        let subscribers = Subscribers::new();

        let first = subscribers.admit("io.example.subscribe", subscriber("1.2.3.4")).unwrap();
        assert!(subscribers.admit("io.example.subscribe", subscriber("1.2.3.4")).is_none());
        assert_eq!(first.ip(), "1.2.3.4");

        let _other_ip = subscribers.admit("io.example.subscribe", subscriber("5.6.7.8")).unwrap();
        let _other_nsid = subscribers.admit("io.example.other", subscriber("1.2.3.4")).unwrap();
        assert_eq!(subscribers.count("io.example.subscribe"), 2);

        drop(first);
        let remaining = subscribers.list("io.example.subscribe");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].ip, "5.6.7.8");
        assert!(subscribers.admit("io.example.subscribe", subscriber("1.2.3.4")).is_some());
    }

    #[test]
    fn test_list_empty() {
        let subscribers = Subscribers::new();
        assert!(subscribers.list("io.example.subscribe").is_empty());
        assert_eq!(subscribers.count("io.example.subscribe"), 0);
    }

    // ===== Send Loop =====

    #[tokio::test]
    async fn test_run_sends_frames_in_order() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let frames = Arc::clone(&sent);

        let mut sink = MockFrameSink::new();
        sink.expect_is_connected().return_const(true);
        sink.expect_send().times(2).returning(move |frame| {
            frames.lock().push(frame);
            Ok(())
        });

        let session = SubscriptionSession::new(
            "io.example.subscribe",
            messages(vec![message(3), message(4)]),
        );
        assert_eq!(session.run(&mut sink).await, SessionEnd::Finished);

        let decoded: Vec<_> = sent
            .lock()
            .iter()
            .map(|frame| decode_frame(frame).unwrap().1)
            .collect();
        assert_eq!(decoded, vec![json!({"num": 3}), json!({"num": 4})]);
    }

    #[tokio::test]
    async fn test_run_stops_on_error_and_releases_guard() {
        let subscribers = Subscribers::new();
        let guard = subscribers
            .admit("io.example.subscribe", subscriber("1.2.3.4"))
            .unwrap();

        let mut sink = MockFrameSink::new();
        sink.expect_is_connected().return_const(true);
        sink.expect_send().times(1).returning(|_| Ok(()));

        let session = SubscriptionSession::new(
            "io.example.subscribe",
            messages(vec![
                message(1),
                Err(DispatchError::Handler(anyhow::anyhow!("boom"))),
                message(2),
            ]),
        )
        .with_guard(guard);

        assert_eq!(subscribers.count("io.example.subscribe"), 1);
        assert_eq!(session.run(&mut sink).await, SessionEnd::Failed);
        assert_eq!(subscribers.count("io.example.subscribe"), 0);
    }

    #[tokio::test]
    async fn test_run_stops_when_send_fails() {
        let mut sink = MockFrameSink::new();
        sink.expect_is_connected().return_const(true);
        sink.expect_send()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("connection reset")));

        let session = SubscriptionSession::new(
            "io.example.subscribe",
            messages(vec![message(1), message(2)]),
        );
        assert_eq!(session.run(&mut sink).await, SessionEnd::Disconnected);
    }

    #[tokio::test]
    async fn test_run_checks_connection_before_send() {
        let mut sink = MockFrameSink::new();
        sink.expect_is_connected().return_const(false);
        sink.expect_send().never();

        let session =
            SubscriptionSession::new("io.example.subscribe", messages(vec![message(1)]));
        assert_eq!(session.run(&mut sink).await, SessionEnd::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_notices_disconnect_while_idle() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);

        let mut sink = MockFrameSink::new();
        sink.expect_is_connected()
            .returning(move || counter.fetch_add(1, Ordering::SeqCst) < 2);
        sink.expect_send().never();

        let session = SubscriptionSession::new("io.example.subscribe", stream::pending().boxed())
            .with_poll_interval(Duration::from_secs(10));
        assert_eq!(session.run(&mut sink).await, SessionEnd::Disconnected);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }
}
