//! Participant - per-peer state
//!
//! One participant exists per connected peer: the locally resolved shared
//! coordinate, the currently bound localization session, the peer's last
//! reported state, and the delta-suppression cache for the outbound state
//! broadcast. Created on peer connect, disposed on peer disconnect.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use align_core::{AlignResult, ConnectionId, LocalizerId, Pose, TrackingState};
use align_transport::NetworkConnection;
use align_wire::{CoordinateStateMessage, MessageReader, SupportedLocalizersMessage};

use crate::coordinate::SpatialCoordinate;
use crate::session::{LocalizationSession, PeerHandle};

/// Peer-supported-localizer knowledge, filled in once, asynchronously.
#[derive(Clone, Debug, Default)]
enum PeerSupport {
    #[default]
    Pending,
    Known(HashSet<LocalizerId>),
    Disposed,
}

#[derive(Default)]
struct ParticipantState {
    coordinate: Option<Arc<dyn SpatialCoordinate>>,
    session: Option<Arc<dyn LocalizationSession>>,
    peer_tracking_state: TrackingState,
    peer_coordinate_located: bool,
    peer_is_locating: bool,
    peer_coordinate_pose: Pose,
    last_sent_state: Option<Vec<u8>>,
}

/// Per-peer coordinator state.
pub struct Participant {
    connection: NetworkConnection,
    state: Mutex<ParticipantState>,
    peer_support_tx: watch::Sender<PeerSupport>,
}

impl Participant {
    pub fn new(connection: NetworkConnection) -> Self {
        let (peer_support_tx, _) = watch::channel(PeerSupport::Pending);
        Participant {
            connection,
            state: Mutex::new(ParticipantState::default()),
            peer_support_tx,
        }
    }

    pub fn connection(&self) -> &NetworkConnection {
        &self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Handle a session uses to exchange data frames with its peer half.
    pub fn peer_handle(&self) -> PeerHandle {
        PeerHandle::new(self.connection.clone())
    }

    /// The locally resolved shared coordinate, if any.
    pub fn coordinate(&self) -> Option<Arc<dyn SpatialCoordinate>> {
        self.state.lock().coordinate.clone()
    }

    /// True while a localization session is bound to this participant.
    pub fn is_locating(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// The currently bound session, for routing in-session data frames.
    pub fn current_session(&self) -> Option<Arc<dyn LocalizationSession>> {
        self.state.lock().session.clone()
    }

    pub(crate) fn bind_session(&self, session: Arc<dyn LocalizationSession>) {
        self.state.lock().session = Some(session);
    }

    /// Finish a session: store its coordinate and unbind, but only if
    /// `session` is still the bound one. A superseding request may already
    /// have bound a new session; in that case the stale result is ignored.
    pub(crate) fn complete_session(
        &self,
        session: &Arc<dyn LocalizationSession>,
        coordinate: Option<Arc<dyn SpatialCoordinate>>,
    ) -> bool {
        let mut state = self.state.lock();
        let still_bound = state
            .session
            .as_ref()
            .is_some_and(|bound| Arc::ptr_eq(bound, session));
        if still_bound {
            state.coordinate = coordinate;
            state.session = None;
        }
        still_bound
    }

    /// Last-reported tracking status of the peer device.
    pub fn peer_tracking_state(&self) -> TrackingState {
        self.state.lock().peer_tracking_state
    }

    /// Whether the peer last reported its shared coordinate as located.
    pub fn peer_coordinate_located(&self) -> bool {
        self.state.lock().peer_coordinate_located
    }

    /// Whether the peer last reported an active localization session.
    pub fn peer_is_locating(&self) -> bool {
        self.state.lock().peer_is_locating
    }

    /// The shared coordinate's pose in the peer device's world space, as
    /// last reported.
    pub fn peer_coordinate_pose(&self) -> Pose {
        self.state.lock().peer_coordinate_pose
    }

    /// Build the current state snapshot and send it iff it differs
    /// byte-for-byte from the last snapshot sent to this peer. Callable
    /// synchronously on demand; the coordinator also calls it every tick.
    pub fn ensure_state_broadcast(&self, tracking_state: TrackingState) {
        if !self.connection.is_connected() {
            return;
        }

        let mut state = self.state.lock();

        let (coordinate_located, pose) = match &state.coordinate {
            Some(coordinate) => (coordinate.state().is_located(), coordinate.world_pose()),
            None => (false, Pose::IDENTITY),
        };
        let message = CoordinateStateMessage {
            tracking_state,
            coordinate_located,
            is_locating: state.session.is_some(),
            position: pose.position,
            rotation: pose.rotation,
        };

        let encoded = match message.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("failed to encode coordinate state: {}", e);
                return;
            }
        };

        if state.last_sent_state.as_deref() != Some(encoded.as_slice()) {
            self.connection.send(&encoded);
            state.last_sent_state = Some(encoded);
        }
    }

    /// Apply a received `COORDSTATE` payload.
    pub fn read_coordinate_state(&self, reader: &mut MessageReader<'_>) -> AlignResult<()> {
        let message = CoordinateStateMessage::decode(reader)?;
        let mut state = self.state.lock();
        state.peer_tracking_state = message.tracking_state;
        state.peer_coordinate_located = message.coordinate_located;
        state.peer_is_locating = message.is_locating;
        state.peer_coordinate_pose = Pose::new(message.position, message.rotation);
        Ok(())
    }

    /// Apply a received `SUPPORTLOC` payload, resolving the peer-support
    /// promise. Only the first message wins; repeats are ignored.
    pub fn read_supported_localizers(&self, reader: &mut MessageReader<'_>) -> AlignResult<()> {
        let message = SupportedLocalizersMessage::decode(reader)?;
        let ids: HashSet<LocalizerId> = message.localizer_ids.into_iter().collect();
        self.peer_support_tx.send_if_modified(|current| {
            if matches!(current, PeerSupport::Pending) {
                *current = PeerSupport::Known(ids);
                true
            } else {
                false
            }
        });
        Ok(())
    }

    /// Send this device's registered localizer ids to the peer.
    pub fn send_supported_localizers(&self, localizer_ids: &[LocalizerId]) {
        let message = SupportedLocalizersMessage {
            localizer_ids: localizer_ids.to_vec(),
        };
        match message.encode() {
            Ok(encoded) => self.connection.send(&encoded),
            Err(e) => tracing::error!("failed to encode supported localizers: {}", e),
        }
    }

    /// The set of localizer ids the peer supports. Resolves once the peer's
    /// `SUPPORTLOC` message arrives; `None` if the participant is disposed
    /// first.
    pub async fn peer_supported_localizers(&self) -> Option<HashSet<LocalizerId>> {
        let mut rx = self.peer_support_tx.subscribe();
        loop {
            match &*rx.borrow_and_update() {
                PeerSupport::Known(ids) => return Some(ids.clone()),
                PeerSupport::Disposed => return None,
                PeerSupport::Pending => {}
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Release per-participant resources: wakes any task still waiting on
    /// the peer-support promise. The bound session, if any, is cancelled by
    /// the coordinator before disposal.
    pub fn dispose(&self) {
        self.peer_support_tx.send_if_modified(|current| {
            if matches!(current, PeerSupport::Pending) {
                *current = PeerSupport::Disposed;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use align_core::{LocatedState, Quat, Vec3};
    use align_transport::{ConnectionKind, EventSinks, IncomingMessage};
    use bytes::Bytes;
    use tokio::sync::mpsc;

    use crate::coordinate::WorldPoseCoordinate;

    fn connection_pair() -> (
        NetworkConnection,
        mpsc::UnboundedReceiver<IncomingMessage>,
    ) {
        let (local, remote) = tokio::io::duplex(65536);
        let (messages_tx, _messages_rx) = mpsc::unbounded_channel();
        let (disconnected_tx, _disconnected_rx) = mpsc::unbounded_channel();
        let local_conn = NetworkConnection::establish(
            local,
            ConnectionId::new(1),
            ConnectionKind::Outbound,
            "mem:local".into(),
            None,
            EventSinks {
                messages: messages_tx,
                disconnected: disconnected_tx,
            },
        );

        let (remote_messages_tx, remote_messages_rx) = mpsc::unbounded_channel();
        let (remote_disconnected_tx, _r) = mpsc::unbounded_channel();
        let _remote_conn = NetworkConnection::establish(
            remote,
            ConnectionId::new(2),
            ConnectionKind::Inbound,
            "mem:remote".into(),
            None,
            EventSinks {
                messages: remote_messages_tx,
                disconnected: remote_disconnected_tx,
            },
        );

        (local_conn, remote_messages_rx)
    }

    async fn count_received(
        rx: &mut mpsc::UnboundedReceiver<IncomingMessage>,
    ) -> usize {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_identical_snapshots_send_once() {
        let (connection, mut remote_rx) = connection_pair();
        let participant = Participant::new(connection);

        participant.ensure_state_broadcast(TrackingState::Tracking);
        participant.ensure_state_broadcast(TrackingState::Tracking);
        participant.ensure_state_broadcast(TrackingState::Tracking);

        assert_eq!(count_received(&mut remote_rx).await, 1);
    }

    #[tokio::test]
    async fn test_changed_snapshot_sends_again() {
        let (connection, mut remote_rx) = connection_pair();
        let participant = Participant::new(connection);

        participant.ensure_state_broadcast(TrackingState::Tracking);
        participant.ensure_state_broadcast(TrackingState::LostTracking);
        participant.ensure_state_broadcast(TrackingState::LostTracking);

        assert_eq!(count_received(&mut remote_rx).await, 2);
    }

    #[tokio::test]
    async fn test_coordinate_change_triggers_broadcast() {
        let (connection, mut remote_rx) = connection_pair();
        let participant = Participant::new(connection);

        participant.ensure_state_broadcast(TrackingState::Tracking);
        {
            let mut state = participant.state.lock();
            state.coordinate = Some(Arc::new(WorldPoseCoordinate::new(
                "c",
                Pose::new(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY),
            )));
        }
        participant.ensure_state_broadcast(TrackingState::Tracking);

        assert_eq!(count_received(&mut remote_rx).await, 2);
    }

    #[tokio::test]
    async fn test_peer_state_roundtrip() {
        let (connection, _remote_rx) = connection_pair();
        let participant = Participant::new(connection);

        let message = CoordinateStateMessage {
            tracking_state: TrackingState::Tracking,
            coordinate_located: true,
            is_locating: false,
            position: Vec3::new(4.0, 5.0, 6.0),
            rotation: Quat::IDENTITY,
        };
        let encoded = message.encode().unwrap();
        let mut reader = MessageReader::new(&encoded);
        // Skip the command header the way the router does.
        align_wire::read_command_header(&mut reader).unwrap();
        participant.read_coordinate_state(&mut reader).unwrap();

        assert_eq!(participant.peer_tracking_state(), TrackingState::Tracking);
        assert!(participant.peer_coordinate_located());
        assert!(!participant.peer_is_locating());
        assert_eq!(
            participant.peer_coordinate_pose().position,
            Vec3::new(4.0, 5.0, 6.0)
        );
    }

    #[tokio::test]
    async fn test_peer_support_promise_resolves() {
        let (connection, _remote_rx) = connection_pair();
        let participant = Arc::new(Participant::new(connection));

        let waiter = participant.clone();
        let handle = tokio::spawn(async move { waiter.peer_supported_localizers().await });

        let message = SupportedLocalizersMessage {
            localizer_ids: vec![LocalizerId::new(7), LocalizerId::new(9)],
        };
        let encoded = message.encode().unwrap();
        let mut reader = MessageReader::new(&encoded);
        align_wire::read_command_header(&mut reader).unwrap();
        participant.read_supported_localizers(&mut reader).unwrap();

        let ids = handle.await.unwrap().unwrap();
        assert_eq!(
            ids,
            HashSet::from([LocalizerId::new(7), LocalizerId::new(9)])
        );
    }

    #[tokio::test]
    async fn test_dispose_cancels_peer_support_waiters() {
        let (connection, _remote_rx) = connection_pair();
        let participant = Arc::new(Participant::new(connection));

        let waiter = participant.clone();
        let handle = tokio::spawn(async move { waiter.peer_supported_localizers().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        participant.dispose();

        assert!(handle.await.unwrap().is_none());
    }

    #[test]
    fn test_located_state_feeds_snapshot() {
        // Resolved counts as located, Unknown does not.
        assert!(LocatedState::Resolved.is_located());
        assert!(!LocatedState::Unknown.is_located());
    }
}
