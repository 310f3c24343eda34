//! In-memory connection pairs and the coordinator harness
//!
//! A memory pair is two fully wired `NetworkConnection`s over an in-process
//! duplex stream. Each side exposes its receive queues, so a test can both
//! observe "the wire" (everything the other side sent, in order) and drive
//! a coordinator by feeding the queues through its event pump.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use align_core::ConnectionId;
use align_coordinator::{ParticipantEvent, SpatialCoordinator};
use align_transport::{
    ConnectionEvent, ConnectionKind, EventSinks, IncomingMessage, NetworkConnection,
};
use align_wire::{read_command_header, MessageReader};

/// One side of an in-memory connection.
pub struct MemoryPeer {
    pub connection: NetworkConnection,
    /// Frames this side received from the other side, in wire order.
    pub messages: mpsc::UnboundedReceiver<IncomingMessage>,
    /// Disconnect events for this side's connection.
    pub disconnects: mpsc::UnboundedReceiver<NetworkConnection>,
}

impl MemoryPeer {
    /// Drain everything received so far, waiting briefly for in-flight
    /// frames to land.
    pub async fn drain_messages(&mut self) -> Vec<IncomingMessage> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut drained = Vec::new();
        while let Ok(message) = self.messages.try_recv() {
            drained.push(message);
        }
        drained
    }

    /// Command headers of everything received so far, in order.
    pub async fn drain_commands(&mut self) -> Vec<String> {
        self.drain_messages()
            .await
            .iter()
            .filter_map(|message| {
                let mut reader = MessageReader::new(&message.payload);
                read_command_header(&mut reader).ok()
            })
            .collect()
    }
}

/// Build a connected in-memory pair. `a` is the outbound side.
pub fn memory_pair(a_id: u64, b_id: u64) -> (MemoryPeer, MemoryPeer) {
    let (a_stream, b_stream) = tokio::io::duplex(1024 * 1024);

    let (a_messages_tx, a_messages_rx) = mpsc::unbounded_channel();
    let (a_disconnects_tx, a_disconnects_rx) = mpsc::unbounded_channel();
    let (b_messages_tx, b_messages_rx) = mpsc::unbounded_channel();
    let (b_disconnects_tx, b_disconnects_rx) = mpsc::unbounded_channel();

    let a = NetworkConnection::establish(
        a_stream,
        ConnectionId::new(a_id),
        ConnectionKind::Outbound,
        format!("mem:{a_id}"),
        None,
        EventSinks {
            messages: a_messages_tx,
            disconnected: a_disconnects_tx,
        },
    );
    let b = NetworkConnection::establish(
        b_stream,
        ConnectionId::new(b_id),
        ConnectionKind::Inbound,
        format!("mem:{b_id}"),
        None,
        EventSinks {
            messages: b_messages_tx,
            disconnected: b_disconnects_tx,
        },
    );

    (
        MemoryPeer {
            connection: a,
            messages: a_messages_rx,
            disconnects: a_disconnects_rx,
        },
        MemoryPeer {
            connection: b,
            messages: b_messages_rx,
            disconnects: b_disconnects_rx,
        },
    )
}

/// A coordinator wired to one side of a memory pair, with the other side
/// fully observable as "the wire".
pub struct CoordinatorHarness {
    pub coordinator: Arc<SpatialCoordinator>,
    /// The connection the coordinator sees its peer through.
    pub connection: NetworkConnection,
    /// The peer's view: every frame the coordinator side sent.
    pub wire: MemoryPeer,
    /// This side's inbound queues, pumped by `pump`.
    local: MemoryPeer,
    pub events: mpsc::UnboundedReceiver<ParticipantEvent>,
}

impl CoordinatorHarness {
    /// Build a harness and fire the Connected event for the peer.
    pub fn connect() -> Self {
        let coordinator = SpatialCoordinator::new();
        Self::connect_with(coordinator)
    }

    /// Same, but with a caller-prepared coordinator (localizers already
    /// registered, so the `SUPPORTLOC` sent on connect reflects them).
    pub fn connect_with(coordinator: Arc<SpatialCoordinator>) -> Self {
        let (local, wire) = memory_pair(1, 2);
        let events = coordinator.subscribe();
        let connection = local.connection.clone();
        coordinator.process_event(ConnectionEvent::Connected(connection.clone()));

        CoordinatorHarness {
            coordinator,
            connection,
            wire,
            local,
            events,
        }
    }

    /// Feed everything the peer sent us through the coordinator's event
    /// pump, then run the per-tick broadcast pass.
    pub async fn pump(&mut self) {
        for message in self.local.drain_messages().await {
            self.coordinator
                .process_event(ConnectionEvent::Message(message));
        }
        self.coordinator.update();
    }

    /// Deliver one raw frame as if the peer had sent it.
    pub fn deliver(&self, payload: Vec<u8>) {
        self.coordinator
            .process_event(ConnectionEvent::Message(IncomingMessage {
                connection: self.connection.clone(),
                payload: payload.into(),
            }));
    }

    /// Fire the Disconnected event for the peer connection.
    pub fn disconnect_peer(&self) {
        self.connection.disconnect();
        self.coordinator
            .process_event(ConnectionEvent::Disconnected(self.connection.clone()));
    }
}
