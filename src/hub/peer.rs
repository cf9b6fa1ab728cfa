//! Push-path connections as seen by the hub.
//!
//! The hub never touches sockets directly. Each connection hands it a
//! [`Peer`]: a process-unique [`ConnectionId`] plus a [`PeerSink`] that knows
//! how to write one text message to that connection. The WebSocket write
//! half implements the sink in production; tests plug in channels or sinks
//! that never complete.

// Rust guideline compliant 2026-02

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

/// Unique identifier for one push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    ///
    /// Monotonic counter in the high bits plus a random suffix, so ids stay
    /// unique within the process and are hard to guess across restarts.
    #[must_use]
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let suffix: u16 = rand::random();
        Self((seq << 16) | u64::from(suffix))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "live:{:x}", self.0)
    }
}

/// Why a single delivery failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The connection is already closed. Expected during disconnects.
    #[error("connection closed")]
    Closed,
    /// Anything else the transport reported.
    #[error("write failed: {0}")]
    Io(String),
}

/// Write side of one push connection.
#[async_trait]
pub trait PeerSink: Send + Sync {
    /// Send one text message.
    async fn send_text(&self, payload: &str) -> Result<(), DeliveryError>;

    /// Close the connection with a status code and reason.
    ///
    /// Best effort; errors are swallowed by implementations.
    async fn close(&self, code: u16, reason: &str);
}

/// A registered connection: identity plus a way to write to it.
#[derive(Clone)]
pub struct Peer {
    id: ConnectionId,
    sink: Arc<dyn PeerSink>,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Peer {
    /// Wrap a sink under a fresh identifier.
    pub fn new(sink: Arc<dyn PeerSink>) -> Self {
        Self {
            id: ConnectionId::next(),
            sink,
        }
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The connection's write side.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn PeerSink> {
        &self.sink
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory sinks shared by hub tests.

    use super::*;
    use tokio::sync::mpsc;

    /// Sink that forwards every message into a channel.
    pub(crate) struct ChannelSink(pub mpsc::UnboundedSender<String>);

    #[async_trait]
    impl PeerSink for ChannelSink {
        async fn send_text(&self, payload: &str) -> Result<(), DeliveryError> {
            self.0.send(payload.to_string()).map_err(|_| DeliveryError::Closed)
        }

        async fn close(&self, _code: u16, _reason: &str) {}
    }

    /// Sink whose writes never complete.
    pub(crate) struct StalledSink;

    #[async_trait]
    impl PeerSink for StalledSink {
        async fn send_text(&self, _payload: &str) -> Result<(), DeliveryError> {
            std::future::pending().await
        }

        async fn close(&self, _code: u16, _reason: &str) {}
    }

    /// Sink that always fails.
    pub(crate) struct BrokenSink;

    #[async_trait]
    impl PeerSink for BrokenSink {
        async fn send_text(&self, _payload: &str) -> Result<(), DeliveryError> {
            Err(DeliveryError::Io("broken pipe".into()))
        }

        async fn close(&self, _code: u16, _reason: &str) {}
    }

    /// Peer backed by a [`ChannelSink`], plus the receiving end.
    pub(crate) fn channel_peer() -> (Peer, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Peer::new(Arc::new(ChannelSink(tx))), rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let ids: std::collections::HashSet<ConnectionId> =
            (0..1000).map(|_| ConnectionId::next()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::next();
        let shown = id.to_string();
        assert!(shown.starts_with("live:"), "Expected 'live:' prefix, got: {shown}");
        assert_eq!(u64::from_str_radix(&shown[5..], 16).unwrap(), id.as_u64());
    }

    #[tokio::test]
    async fn test_channel_peer_receives() {
        let (peer, mut rx) = testing::channel_peer();
        peer.sink().send_text("hi").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "hi");
        assert!(format!("{peer:?}").contains("Peer"));
    }
}
