//! Network connection endpoint
//!
//! One `NetworkConnection` represents one physical peer stream. The handle
//! is cheap to clone; upper layers hold non-owning clones keyed by
//! [`ConnectionId`]. Socket I/O runs on two background tasks (reader,
//! writer) that communicate with the rest of the system exclusively
//! through queues - connect/message/disconnect events are only ever
//! observed from the manager's pump, never from an I/O task directly.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use align_core::{CancellationToken, ConnectionId};

use crate::framing::{read_frame, write_frame};

/// Whether this endpoint was dialed out or accepted in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Client side: this device dialed the peer
    Outbound,
    /// Server side: the peer dialed this device
    Inbound,
}

/// One message received from a peer, paired with its connection.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub connection: NetworkConnection,
    pub payload: Bytes,
}

impl IncomingMessage {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Queue endpoints an established connection feeds. The manager owns the
/// receiving halves and drains them in its `update` pump.
#[derive(Clone)]
pub struct EventSinks {
    pub messages: mpsc::UnboundedSender<IncomingMessage>,
    pub disconnected: mpsc::UnboundedSender<NetworkConnection>,
}

struct ConnectionShared {
    id: ConnectionId,
    kind: ConnectionKind,
    address: String,
    connected: AtomicBool,
    last_activity: Mutex<Instant>,
    inactivity_timeout: Option<Duration>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: CancellationToken,
    disconnected_sink: mpsc::UnboundedSender<NetworkConnection>,
}

/// Handle to one peer stream endpoint.
#[derive(Clone)]
pub struct NetworkConnection {
    shared: Arc<ConnectionShared>,
}

impl NetworkConnection {
    /// Take ownership of a connected byte stream and start its I/O tasks.
    /// Inbound frames land on `sinks.messages`; the disconnect event (one,
    /// ever) lands on `sinks.disconnected`.
    pub fn establish<S>(
        stream: S,
        id: ConnectionId,
        kind: ConnectionKind,
        address: String,
        inactivity_timeout: Option<Duration>,
        sinks: EventSinks,
    ) -> NetworkConnection
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let connection = NetworkConnection {
            shared: Arc::new(ConnectionShared {
                id,
                kind,
                address,
                connected: AtomicBool::new(true),
                last_activity: Mutex::new(Instant::now()),
                inactivity_timeout,
                outgoing: outgoing_tx,
                shutdown: CancellationToken::new(),
                disconnected_sink: sinks.disconnected,
            }),
        };

        let (read_half, write_half) = tokio::io::split(stream);
        tokio::spawn(Self::run_reader(
            connection.clone(),
            read_half,
            sinks.messages,
        ));
        tokio::spawn(Self::run_writer(connection.clone(), write_half, outgoing_rx));

        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.shared.kind
    }

    /// Stable peer address string, for logs and idempotency checks.
    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Send one message frame. A send on a dead connection is a logged
    /// no-op; network hiccups must not unwind negotiation logic upstream.
    pub fn send(&self, data: &[u8]) {
        if !self.is_connected() {
            tracing::warn!(
                "attempted to send {} bytes to disconnected connection {}",
                data.len(),
                self.shared.address
            );
            return;
        }

        if self.shared.outgoing.send(data.to_vec()).is_err() {
            tracing::warn!("writer for {} is gone, disconnecting", self.shared.address);
            self.disconnect();
        }
    }

    /// Transition Connected -> Disconnected exactly once, regardless of how
    /// many times this is called, and enqueue a single disconnect event.
    pub fn disconnect(&self) {
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            tracing::debug!("disconnecting {}", self.shared.address);
            self.shared.shutdown.cancel();
            let _ = self.shared.disconnected_sink.send(self.clone());
        }
    }

    /// Force-disconnect if the configured inactivity timeout has elapsed.
    /// Called once per tick by the owning manager; no-op when no timeout is
    /// configured.
    pub fn check_timeout(&self, now: Instant) {
        let Some(timeout) = self.shared.inactivity_timeout else {
            return;
        };
        if !self.is_connected() {
            return;
        }

        let last = *self.shared.last_activity.lock();
        if now.saturating_duration_since(last) > timeout {
            tracing::warn!(
                "connection {} inactive for more than {:?}, disconnecting",
                self.shared.address,
                timeout
            );
            self.disconnect();
        }
    }

    /// Completes once the connection has disconnected.
    pub async fn wait_disconnected(&self) {
        self.shared.shutdown.cancelled().await;
    }

    fn touch(&self) {
        *self.shared.last_activity.lock() = Instant::now();
    }

    async fn run_reader<R>(
        connection: NetworkConnection,
        mut read_half: R,
        messages: mpsc::UnboundedSender<IncomingMessage>,
    ) where
        R: AsyncRead + Unpin,
    {
        let shutdown = connection.shared.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = read_frame(&mut read_half) => {
                    match frame {
                        Ok(body) => {
                            connection.touch();
                            let message = IncomingMessage {
                                connection: connection.clone(),
                                payload: Bytes::from(body),
                            };
                            if messages.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(
                                "read loop for {} ended: {}",
                                connection.shared.address,
                                e
                            );
                            break;
                        }
                    }
                }
            }
        }

        connection.disconnect();
    }

    async fn run_writer<W>(
        connection: NetworkConnection,
        mut write_half: W,
        mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    ) where
        W: AsyncWrite + Unpin,
    {
        let shutdown = connection.shared.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = outgoing.recv() => {
                    let Some(frame) = next else { break };
                    if let Err(e) = write_frame(&mut write_half, &frame).await {
                        tracing::warn!(
                            "write to {} failed: {}",
                            connection.shared.address,
                            e
                        );
                        break;
                    }
                }
            }
        }

        connection.disconnect();
    }
}

impl fmt::Debug for NetworkConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConnection")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("address", &self.shared.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl fmt::Display for NetworkConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.shared.address)
    }
}

/// Connections compare by identity, not by contents; a handle clone is the
/// same connection.
impl PartialEq for NetworkConnection {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for NetworkConnection {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sinks() -> (
        EventSinks,
        mpsc::UnboundedReceiver<IncomingMessage>,
        mpsc::UnboundedReceiver<NetworkConnection>,
    ) {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (disconnected_tx, disconnected_rx) = mpsc::unbounded_channel();
        (
            EventSinks {
                messages: messages_tx,
                disconnected: disconnected_tx,
            },
            messages_rx,
            disconnected_rx,
        )
    }

    fn pair() -> (
        NetworkConnection,
        NetworkConnection,
        mpsc::UnboundedReceiver<IncomingMessage>,
        mpsc::UnboundedReceiver<IncomingMessage>,
        mpsc::UnboundedReceiver<NetworkConnection>,
    ) {
        let (left, right) = tokio::io::duplex(65536);
        let (sinks_a, messages_a, disconnects_a) = sinks();
        let (sinks_b, messages_b, _disconnects_b) = sinks();

        let a = NetworkConnection::establish(
            left,
            ConnectionId::new(1),
            ConnectionKind::Outbound,
            "mem:a".into(),
            None,
            sinks_a,
        );
        let b = NetworkConnection::establish(
            right,
            ConnectionId::new(2),
            ConnectionKind::Inbound,
            "mem:b".into(),
            None,
            sinks_b,
        );
        (a, b, messages_a, messages_b, disconnects_a)
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (a, _b, _ra, mut rb, _da) = pair();

        a.send(b"ping");
        let message = rb.recv().await.unwrap();
        assert_eq!(&message.payload[..], b"ping");
        assert_eq!(message.len(), 4);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (a, _b, _ra, _rb, mut da) = pair();

        a.disconnect();
        a.disconnect();
        a.disconnect();

        assert!(!a.is_connected());
        let first = da.recv().await.unwrap();
        assert_eq!(first.id(), a.id());
        // No second event queued for repeated calls.
        assert!(da.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_disconnect_is_noop() {
        let (a, _b, _ra, mut rb, _da) = pair();
        a.disconnect();
        a.send(b"dropped");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rb.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_peer_close_produces_disconnect_event() {
        let (a, b, _ra, _rb, mut da) = pair();
        b.disconnect();
        let gone = da.recv().await.unwrap();
        assert_eq!(gone.id(), a.id());
        assert!(!a.is_connected());
    }

    #[tokio::test]
    async fn test_inactivity_timeout_disconnects() {
        let (left, _right) = tokio::io::duplex(4096);
        let (sinks_a, _messages, mut disconnects) = sinks();
        let a = NetworkConnection::establish(
            left,
            ConnectionId::new(7),
            ConnectionKind::Inbound,
            "mem:timeout".into(),
            Some(Duration::from_millis(5)),
            sinks_a,
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        a.check_timeout(Instant::now());

        assert!(!a.is_connected());
        assert_eq!(disconnects.recv().await.unwrap().id(), a.id());
    }

    #[tokio::test]
    async fn test_no_timeout_configured_never_disconnects() {
        let (left, _right) = tokio::io::duplex(4096);
        let (sinks_a, _messages, _disconnects) = sinks();
        let a = NetworkConnection::establish(
            left,
            ConnectionId::new(8),
            ConnectionKind::Inbound,
            "mem:no-timeout".into(),
            None,
            sinks_a,
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        a.check_timeout(Instant::now());
        assert!(a.is_connected());
    }
}
