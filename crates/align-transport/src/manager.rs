//! Connection manager
//!
//! Owns the physical sockets: zero-or-one outbound client connection and
//! zero-or-many inbound server connections. Raw socket events are queued
//! by the I/O tasks and surfaced exclusively from [`ConnectionManager::update`],
//! so upper layers observe connects, disconnects, and messages from one
//! logical thread and never interleaved with each other.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use align_core::{AlignError, AlignResult, CancellationToken, ConnectionId};

use crate::connection::{
    ConnectionKind, EventSinks, IncomingMessage, NetworkConnection,
};

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// If true, a dropped client connection is re-dialed after
    /// `reconnect_delay` until `disconnect_all` or a different target.
    pub attempt_reconnect_when_client: bool,
    /// Delay between client reconnect attempts.
    pub reconnect_delay: Duration,
    /// Force-disconnect a connection with no inbound traffic for this
    /// long. `None` disables the check (long-lived trusted peer links).
    pub inactivity_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            attempt_reconnect_when_client: false,
            reconnect_delay: Duration::from_secs(2),
            inactivity_timeout: None,
        }
    }
}

/// Event surfaced by the per-tick pump.
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    Connected(NetworkConnection),
    Disconnected(NetworkConnection),
    Message(IncomingMessage),
}

struct ListenerHandle {
    port: u16,
    cancel: CancellationToken,
}

struct ClientHandle {
    address: String,
    port: u16,
    cancel: CancellationToken,
    /// Set by the dial task when it exits (no more attempts will be made).
    finished: Arc<AtomicBool>,
}

/// Socket owner and event pump.
pub struct ConnectionManager {
    config: ConnectionConfig,
    next_id: Arc<AtomicU64>,

    listener: Option<ListenerHandle>,
    client: Option<ClientHandle>,

    client_connection: Option<NetworkConnection>,
    server_connections: Vec<NetworkConnection>,

    connected_tx: mpsc::UnboundedSender<NetworkConnection>,
    connected_rx: mpsc::UnboundedReceiver<NetworkConnection>,
    disconnected_tx: mpsc::UnboundedSender<NetworkConnection>,
    disconnected_rx: mpsc::UnboundedReceiver<NetworkConnection>,
    message_tx: mpsc::UnboundedSender<IncomingMessage>,
    message_rx: mpsc::UnboundedReceiver<IncomingMessage>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        let (connected_tx, connected_rx) = mpsc::unbounded_channel();
        let (disconnected_tx, disconnected_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        ConnectionManager {
            config,
            next_id: Arc::new(AtomicU64::new(1)),
            listener: None,
            client: None,
            client_connection: None,
            server_connections: Vec::new(),
            connected_tx,
            connected_rx,
            disconnected_tx,
            disconnected_rx,
            message_tx,
            message_rx,
        }
    }

    fn sinks(&self) -> EventSinks {
        EventSinks {
            messages: self.message_tx.clone(),
            disconnected: self.disconnected_tx.clone(),
        }
    }

    /// Start accepting inbound connections. Idempotent: a second call while
    /// already listening logs and returns the active port. Binding to port
    /// 0 picks an ephemeral port, returned for the caller's benefit.
    pub fn start_listening(&mut self, port: u16) -> AlignResult<u16> {
        if let Some(listener) = &self.listener {
            tracing::warn!(
                "already listening on port {}, ignoring start_listening({})",
                listener.port,
                port
            );
            return Ok(listener.port);
        }

        let std_listener = std::net::TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| AlignError::TransportError(e.to_string()))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| AlignError::TransportError(e.to_string()))?;
        let bound_port = std_listener
            .local_addr()
            .map_err(|e| AlignError::TransportError(e.to_string()))?
            .port();
        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| AlignError::TransportError(e.to_string()))?;

        tracing::info!("listening on port {}", bound_port);

        let cancel = CancellationToken::new();
        tokio::spawn(Self::run_listener(
            listener,
            cancel.clone(),
            self.next_id.clone(),
            self.config.inactivity_timeout,
            self.connected_tx.clone(),
            self.sinks(),
        ));

        self.listener = Some(ListenerHandle {
            port: bound_port,
            cancel,
        });
        Ok(bound_port)
    }

    /// Stop accepting inbound connections. Connections already accepted
    /// stay up. Idempotent.
    pub fn stop_listening(&mut self) {
        if let Some(listener) = self.listener.take() {
            tracing::info!("stopped listening on port {}", listener.port);
            listener.cancel.cancel();
        }
    }

    /// Dial an outbound connection. Calling again with the identical
    /// still-active target is a no-op; a different target tears the
    /// previous client down first.
    pub fn connect_to(&mut self, address: &str, port: u16) {
        if let Some(client) = &self.client {
            let same_target = client.address == address && client.port == port;
            if same_target && !client.finished.load(Ordering::Acquire) {
                tracing::debug!("client already created for {}:{}", address, port);
                return;
            }
            tracing::info!(
                "disconnecting existing client {}:{}",
                client.address,
                client.port
            );
            self.stop_client();
        }

        tracing::info!("connecting to {}:{}", address, port);

        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        tokio::spawn(Self::run_client(
            address.to_string(),
            port,
            self.config.clone(),
            cancel.clone(),
            finished.clone(),
            self.next_id.clone(),
            self.connected_tx.clone(),
            self.sinks(),
        ));

        self.client = Some(ClientHandle {
            address: address.to_string(),
            port,
            cancel,
            finished,
        });
    }

    /// Send one message to every currently known connection.
    pub fn broadcast(&self, data: &[u8]) {
        if let Some(connection) = &self.client_connection {
            connection.send(data);
        }
        for connection in &self.server_connections {
            connection.send(data);
        }
    }

    /// Tear everything down. The client dial machinery is stopped before
    /// any endpoint is disconnected; otherwise a just-disconnected client
    /// could race to reconnect while the rest is being torn down.
    pub fn disconnect_all(&mut self) {
        self.stop_client();
        for connection in self.server_connections.drain(..) {
            connection.disconnect();
        }
    }

    fn stop_client(&mut self) {
        if let Some(client) = self.client.take() {
            client.cancel.cancel();
        }
        if let Some(connection) = self.client_connection.take() {
            connection.disconnect();
        }
    }

    /// All currently known connections (client first if present).
    pub fn connections(&self) -> Vec<NetworkConnection> {
        let mut connections = Vec::with_capacity(1 + self.server_connections.len());
        if let Some(connection) = &self.client_connection {
            connections.push(connection.clone());
        }
        connections.extend(self.server_connections.iter().cloned());
        connections
    }

    pub fn has_connections(&self) -> bool {
        self.client_connection.is_some() || !self.server_connections.is_empty()
    }

    /// True while a client dial task is running but not yet connected.
    pub fn is_connecting(&self) -> bool {
        match &self.client {
            Some(client) => {
                !client.finished.load(Ordering::Acquire) && self.client_connection.is_none()
            }
            None => false,
        }
    }

    /// The per-tick pump. Order is fixed: timeout checks, then new
    /// connections, then disconnections, then messages. Every event any
    /// upper layer ever sees comes out of this call.
    pub fn update(&mut self) -> Vec<ConnectionEvent> {
        let now = Instant::now();
        if let Some(connection) = &self.client_connection {
            connection.check_timeout(now);
        }
        for connection in &self.server_connections {
            connection.check_timeout(now);
        }

        let mut events = Vec::new();

        while let Ok(connection) = self.connected_rx.try_recv() {
            match connection.kind() {
                ConnectionKind::Outbound => {
                    self.client_connection = Some(connection.clone());
                }
                ConnectionKind::Inbound => {
                    self.server_connections.push(connection.clone());
                }
            }
            events.push(ConnectionEvent::Connected(connection));
        }

        while let Ok(connection) = self.disconnected_rx.try_recv() {
            match connection.kind() {
                ConnectionKind::Outbound => {
                    if self
                        .client_connection
                        .as_ref()
                        .is_some_and(|current| *current == connection)
                    {
                        self.client_connection = None;
                    }
                }
                ConnectionKind::Inbound => {
                    self.server_connections.retain(|c| *c != connection);
                }
            }
            events.push(ConnectionEvent::Disconnected(connection));
        }

        while let Ok(message) = self.message_rx.try_recv() {
            events.push(ConnectionEvent::Message(message));
        }

        events
    }

    async fn run_listener(
        listener: TcpListener,
        cancel: CancellationToken,
        next_id: Arc<AtomicU64>,
        inactivity_timeout: Option<Duration>,
        connected_tx: mpsc::UnboundedSender<NetworkConnection>,
        sinks: EventSinks,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            tracing::info!("accepted connection from {}", peer_addr);
                            let id = ConnectionId::new(next_id.fetch_add(1, Ordering::Relaxed));
                            let connection = NetworkConnection::establish(
                                stream,
                                id,
                                ConnectionKind::Inbound,
                                peer_addr.to_string(),
                                inactivity_timeout,
                                sinks.clone(),
                            );
                            if connected_tx.send(connection).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("accept failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_client(
        address: String,
        port: u16,
        config: ConnectionConfig,
        cancel: CancellationToken,
        finished: Arc<AtomicBool>,
        next_id: Arc<AtomicU64>,
        connected_tx: mpsc::UnboundedSender<NetworkConnection>,
        sinks: EventSinks,
    ) {
        loop {
            let dial = TcpStream::connect((address.as_str(), port));
            let stream = tokio::select! {
                _ = cancel.cancelled() => break,
                result = dial => match result {
                    Ok(stream) => Some(stream),
                    Err(e) => {
                        tracing::warn!("connect to {}:{} failed: {}", address, port, e);
                        None
                    }
                }
            };

            if let Some(stream) = stream {
                tracing::info!("client connected to {}:{}", address, port);
                let id = ConnectionId::new(next_id.fetch_add(1, Ordering::Relaxed));
                let connection = NetworkConnection::establish(
                    stream,
                    id,
                    ConnectionKind::Outbound,
                    format!("{}:{}", address, port),
                    config.inactivity_timeout,
                    sinks.clone(),
                );
                if connected_tx.send(connection.clone()).is_err() {
                    break;
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        connection.disconnect();
                        break;
                    }
                    _ = connection.wait_disconnected() => {}
                }
            }

            if !config.attempt_reconnect_when_client {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(config.reconnect_delay) => {}
            }
        }

        finished.store(true, Ordering::Release);
    }
}
