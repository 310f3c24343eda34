//! Spatial coordinator - the negotiation state machine
//!
//! Central authority for localization sessions: owns the localizer
//! registry, one participant per connected peer, the remote request
//! tickets, and at most one locally running session at a time. All state
//! mutation happens from the single tick thread that drains the connection
//! manager's event pump; long-running sessions are tokio tasks that only
//! re-enter through the coordinator's locked methods.
//!
//! Failure policy: negotiation failures (unknown localizer, bad settings,
//! session conflict, null coordinate) are boolean results plus a log line.
//! Nothing in here panics across the pump boundary because of a bad peer
//! message.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use align_core::{
    AlignError, AlignResult, CancellationToken, ConnectionId, LocalizerId, TrackingState,
};
use align_transport::{ConnectionEvent, ConnectionManager, NetworkConnection};
use align_wire::{
    LocalizeDoneMessage, LocalizeMessage, MessageReader, COMMAND_COORDINATE_STATE,
    COMMAND_LOCALIZATION_DATA, COMMAND_LOCALIZE, COMMAND_LOCALIZE_DONE,
    COMMAND_SUPPORTED_LOCALIZERS,
};

use crate::participant::Participant;
use crate::router::CommandRouter;
use crate::session::{LocalizationSession, SpatialLocalizer};
use crate::ticket::{RemoteLocalizationTicket, TicketResolver};
use crate::tracking::TrackingObserver;

/// Participant lifecycle notification, delivered through subscriber
/// queues. External initiators typically react to `Connected` by starting
/// a localization.
#[derive(Clone)]
pub enum ParticipantEvent {
    Connected(Arc<Participant>),
    Disconnected(Arc<Participant>),
}

struct CurrentSession {
    participant_id: ConnectionId,
    session: Arc<dyn LocalizationSession>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct CoordinatorInner {
    localizers: HashMap<LocalizerId, Arc<dyn SpatialLocalizer>>,
    participants: HashMap<ConnectionId, Arc<Participant>>,
    remote_tickets: HashMap<ConnectionId, TicketResolver>,
    current_session: Option<CurrentSession>,
    tracking_observer: Option<Arc<dyn TrackingObserver>>,
    subscribers: Vec<mpsc::UnboundedSender<ParticipantEvent>>,
}

/// The negotiation authority. Explicitly constructed and passed around;
/// create one per composition root (tests run several in parallel).
pub struct SpatialCoordinator {
    inner: Mutex<CoordinatorInner>,
    router: Mutex<CommandRouter>,
}

impl SpatialCoordinator {
    /// Build a coordinator with its command handlers registered.
    pub fn new() -> Arc<Self> {
        let coordinator = Arc::new(SpatialCoordinator {
            inner: Mutex::new(CoordinatorInner::default()),
            router: Mutex::new(CommandRouter::new()),
        });
        coordinator.register_command_handlers();
        coordinator
    }

    fn register_command_handlers(self: &Arc<Self>) {
        let mut router = self.router.lock();

        let weak = Arc::downgrade(self);
        router
            .register(
                COMMAND_LOCALIZE,
                Box::new(move |connection, _command, reader| {
                    Self::on_localize_received(&weak, connection, reader);
                }),
            )
            .expect("fresh router");

        let weak = Arc::downgrade(self);
        router
            .register(
                COMMAND_LOCALIZE_DONE,
                Box::new(move |connection, _command, reader| {
                    if let Some(coordinator) = weak.upgrade() {
                        coordinator.on_localize_done_received(connection, reader);
                    }
                }),
            )
            .expect("fresh router");

        let weak = Arc::downgrade(self);
        router
            .register(
                COMMAND_COORDINATE_STATE,
                Box::new(move |connection, _command, reader| {
                    if let Some(coordinator) = weak.upgrade() {
                        coordinator.on_coordinate_state_received(connection, reader);
                    }
                }),
            )
            .expect("fresh router");

        let weak = Arc::downgrade(self);
        router
            .register(
                COMMAND_SUPPORTED_LOCALIZERS,
                Box::new(move |connection, _command, reader| {
                    if let Some(coordinator) = weak.upgrade() {
                        coordinator.on_supported_localizers_received(connection, reader);
                    }
                }),
            )
            .expect("fresh router");

        let weak = Arc::downgrade(self);
        router
            .register(
                COMMAND_LOCALIZATION_DATA,
                Box::new(move |connection, _command, reader| {
                    if let Some(coordinator) = weak.upgrade() {
                        coordinator.on_participant_data_received(connection, reader);
                    }
                }),
            )
            .expect("fresh router");
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a localization algorithm. Duplicate ids and localizers that
    /// report themselves unsupported on this platform are refused.
    pub fn register_localizer(&self, localizer: Arc<dyn SpatialLocalizer>) -> AlignResult<()> {
        let id = localizer.id();
        if !localizer.is_supported() {
            tracing::error!(
                "localizer {} ({}) is not supported on this platform",
                localizer.display_name(),
                id
            );
            return Err(AlignError::UnsupportedLocalizer(id));
        }

        let mut inner = self.inner.lock();
        if inner.localizers.contains_key(&id) {
            tracing::error!("cannot register multiple localizers with the same id {}", id);
            return Err(AlignError::DuplicateLocalizer(id));
        }
        tracing::debug!("registering localizer {} ({})", localizer.display_name(), id);
        inner.localizers.insert(id, localizer);
        Ok(())
    }

    /// Remove a registered localizer. Unregistering an unknown id is an
    /// error log, not a panic.
    pub fn unregister_localizer(&self, id: LocalizerId) -> AlignResult<()> {
        let mut inner = self.inner.lock();
        if inner.localizers.remove(&id).is_none() {
            tracing::error!("attempted to unregister localizer {} that was not registered", id);
            return Err(AlignError::UnknownLocalizer(id));
        }
        Ok(())
    }

    /// Ids of all registered localizers.
    pub fn localizer_ids(&self) -> Vec<LocalizerId> {
        self.inner.lock().localizers.keys().copied().collect()
    }

    /// Register the source of the local device's tracking status. A second
    /// registration is an error but still replaces the first.
    pub fn register_tracking_observer(&self, observer: Arc<dyn TrackingObserver>) {
        let mut inner = self.inner.lock();
        if inner.tracking_observer.is_some() {
            tracing::error!("multiple tracking observers registered for the application");
        }
        inner.tracking_observer = Some(observer);
    }

    /// Current local tracking status; `Unknown` without an observer.
    pub fn tracking_state(&self) -> TrackingState {
        self.inner
            .lock()
            .tracking_observer
            .as_ref()
            .map_or(TrackingState::Unknown, |observer| observer.tracking_state())
    }

    /// Subscribe to participant lifecycle events. Dropped receivers are
    /// pruned on the next event.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ParticipantEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    fn publish(&self, event: ParticipantEvent) {
        self.inner
            .lock()
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn participant(&self, id: ConnectionId) -> Option<Arc<Participant>> {
        self.inner.lock().participants.get(&id).cloned()
    }

    pub fn participants(&self) -> Vec<Arc<Participant>> {
        self.inner.lock().participants.values().cloned().collect()
    }

    /// True if every known participant has a located local coordinate, no
    /// session running, and a located peer coordinate. False with no
    /// participants.
    pub fn all_coordinates_located(&self) -> bool {
        let inner = self.inner.lock();
        !inner.participants.is_empty()
            && inner.participants.values().all(|participant| {
                participant
                    .coordinate()
                    .is_some_and(|coordinate| coordinate.state().is_located())
                    && !participant.is_locating()
                    && participant.peer_coordinate_located()
            })
    }

    /// True while any localization negotiation is in flight, local or
    /// requested of a peer.
    pub fn localization_running(&self) -> bool {
        let inner = self.inner.lock();
        inner.current_session.is_some() || !inner.remote_tickets.is_empty()
    }

    // ------------------------------------------------------------------
    // Localization entry points
    // ------------------------------------------------------------------

    /// Ask the peer on `connection` to run `localizer_id` with the given
    /// pre-serialized settings. A still-pending ticket for the same
    /// connection is cancelled and replaced; last request wins.
    pub fn run_remote_localization(
        &self,
        connection: &NetworkConnection,
        localizer_id: LocalizerId,
        settings: Vec<u8>,
    ) -> RemoteLocalizationTicket {
        tracing::debug!(
            "initiating remote localization on {}: {}",
            connection,
            localizer_id
        );

        let (resolver, ticket) = RemoteLocalizationTicket::new();
        {
            let mut inner = self.inner.lock();
            if let Some(superseded) = inner.remote_tickets.insert(connection.id(), resolver) {
                tracing::debug!("cancelling existing remote localization on {}", connection);
                drop(superseded);
            }
        }

        let message = LocalizeMessage {
            localizer_id,
            settings,
        };
        match message.encode() {
            Ok(encoded) => connection.send(&encoded),
            Err(e) => tracing::error!("failed to encode localize request: {}", e),
        }

        ticket
    }

    /// Run `localizer_id` locally against the participant for `connection`.
    /// Returns whether a coordinate was resolved. All failure paths log and
    /// return false.
    pub async fn localize(
        &self,
        connection: &NetworkConnection,
        localizer_id: LocalizerId,
        settings: &[u8],
    ) -> bool {
        let (participant, localizer) = {
            let inner = self.inner.lock();
            (
                inner.participants.get(&connection.id()).cloned(),
                inner.localizers.get(&localizer_id).cloned(),
            )
        };

        let Some(participant) = participant else {
            tracing::error!("no participant for connection {}", connection);
            return false;
        };
        let Some(localizer) = localizer else {
            tracing::error!("no localizer registered with id {}", localizer_id);
            return false;
        };

        self.run_localization_session(localizer, settings, participant)
            .await
    }

    async fn run_localization_session(
        &self,
        localizer: Arc<dyn SpatialLocalizer>,
        settings: &[u8],
        participant: Arc<Participant>,
    ) -> bool {
        if !self.try_cleanup_existing_session(participant.connection_id()) {
            tracing::error!(
                "existing localization session for another participant prevented a new session"
            );
            return false;
        }

        let mut settings_reader = MessageReader::new(settings);
        let session = match localizer.create_session(participant.peer_handle(), &mut settings_reader)
        {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(
                    "localizer {} rejected session creation: {}",
                    localizer.display_name(),
                    e
                );
                return false;
            }
        };

        let cancel = CancellationToken::new();
        {
            let mut inner = self.inner.lock();
            if inner.current_session.is_some() {
                // Repopulated between cleanup and bind; do not run two.
                tracing::debug!("localization session repopulated after cleanup, not running");
                return false;
            }
            inner.current_session = Some(CurrentSession {
                participant_id: participant.connection_id(),
                session: session.clone(),
                cancel: cancel.clone(),
            });
            participant.bind_session(session.clone());
        }

        let coordinate = session.localize(cancel).await;
        let succeeded = coordinate.is_some();

        {
            let mut inner = self.inner.lock();
            if inner
                .current_session
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(&current.session, &session))
            {
                inner.current_session = None;
            }
        }
        if !participant.complete_session(&session, coordinate) {
            tracing::warn!(
                "localization session completed but was no longer bound to its participant"
            );
        }

        succeeded
    }

    /// Cancel the running session if it belongs to `participant_id`.
    /// Returns false when a session for a different participant is running;
    /// that session is left alone and the caller must not start a new one.
    fn try_cleanup_existing_session(&self, participant_id: ConnectionId) -> bool {
        let to_cancel = {
            let mut inner = self.inner.lock();
            match &inner.current_session {
                None => None,
                Some(current) if current.participant_id == participant_id => {
                    inner.current_session.take()
                }
                Some(_) => return false,
            }
        };

        if let Some(current) = to_cancel {
            tracing::debug!(
                "cancelling localization session for participant {}",
                current.participant_id
            );
            current.cancel.cancel();
        }
        true
    }

    // ------------------------------------------------------------------
    // Connection lifecycle and the tick pump
    // ------------------------------------------------------------------

    /// Feed one connection event into the coordinator. Call from the same
    /// logical thread that drains the manager pump.
    pub fn process_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected(connection) => self.on_connected(connection),
            ConnectionEvent::Disconnected(connection) => self.on_disconnected(&connection),
            ConnectionEvent::Message(message) => self.router.lock().dispatch(&message),
        }
    }

    /// One full tick: drain the manager's pump through this coordinator,
    /// then broadcast participant state deltas.
    pub fn pump(self: &Arc<Self>, manager: &mut ConnectionManager) {
        for event in manager.update() {
            self.process_event(event);
        }
        self.update();
    }

    /// Per-tick state broadcast: every participant sends its snapshot iff
    /// it changed since the last one sent.
    pub fn update(&self) {
        let tracking_state = self.tracking_state();
        for participant in self.participants() {
            participant.ensure_state_broadcast(tracking_state);
        }
    }

    fn on_connected(&self, connection: NetworkConnection) {
        let participant = {
            let mut inner = self.inner.lock();
            if inner.participants.contains_key(&connection.id()) {
                tracing::warn!("participant connected that already existed: {}", connection);
                return;
            }
            tracing::debug!("creating participant for {}", connection);
            let participant = Arc::new(Participant::new(connection.clone()));
            inner
                .participants
                .insert(connection.id(), participant.clone());

            let localizer_ids: Vec<LocalizerId> = inner.localizers.keys().copied().collect();
            participant.send_supported_localizers(&localizer_ids);
            participant
        };

        self.publish(ParticipantEvent::Connected(participant));
    }

    fn on_disconnected(&self, connection: &NetworkConnection) {
        let (participant, ticket) = {
            let mut inner = self.inner.lock();
            (
                inner.participants.remove(&connection.id()),
                inner.remote_tickets.remove(&connection.id()),
            )
        };

        if let Some(participant) = participant {
            self.try_cleanup_existing_session(connection.id());
            participant.dispose();
            self.publish(ParticipantEvent::Disconnected(participant));
        }

        if let Some(ticket) = ticket {
            // The peer is gone; the requested remote session can no longer
            // report. Resolve as failed rather than cancelled.
            ticket.resolve(false);
        }
    }

    // ------------------------------------------------------------------
    // Command handlers
    // ------------------------------------------------------------------

    fn send_localization_complete(connection: &NetworkConnection, succeeded: bool) {
        let message = LocalizeDoneMessage { succeeded };
        match message.encode() {
            Ok(encoded) => connection.send(&encoded),
            Err(e) => tracing::error!("failed to encode localization complete: {}", e),
        }
    }

    /// Peer asked this device to run a localization session. The heavy
    /// lifting runs as a task; the payload is copied out first because the
    /// reader borrows the pump's buffer.
    fn on_localize_received(
        weak: &Weak<Self>,
        connection: &NetworkConnection,
        reader: &mut MessageReader<'_>,
    ) {
        let Some(coordinator) = weak.upgrade() else {
            return;
        };

        let message = match LocalizeMessage::decode(reader) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("malformed localize request from {}: {}", connection, e);
                Self::send_localization_complete(connection, false);
                return;
            }
        };

        let participant = coordinator.participant(connection.id());
        let Some(participant) = participant else {
            tracing::error!("no participant for connection {}", connection);
            Self::send_localization_complete(connection, false);
            return;
        };

        let localizer = coordinator.inner.lock().localizers.get(&message.localizer_id).cloned();
        let Some(localizer) = localizer else {
            tracing::error!(
                "request to localize with {} but no such localizer is registered",
                message.localizer_id
            );
            Self::send_localization_complete(connection, false);
            return;
        };

        let connection = connection.clone();
        tokio::spawn(async move {
            let succeeded = coordinator
                .run_localization_session(localizer, &message.settings, participant.clone())
                .await;

            // The peer must observe the located state before it observes
            // session completion; flush the snapshot ahead of the reply.
            participant.ensure_state_broadcast(coordinator.tracking_state());

            Self::send_localization_complete(&connection, succeeded);
        });
    }

    fn on_localize_done_received(
        &self,
        connection: &NetworkConnection,
        reader: &mut MessageReader<'_>,
    ) {
        let message = match LocalizeDoneMessage::decode(reader) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("malformed localization complete from {}: {}", connection, e);
                return;
            }
        };

        let ticket = self.inner.lock().remote_tickets.remove(&connection.id());
        match ticket {
            Some(ticket) => {
                tracing::debug!("remote localization on {} completed: {}", connection, message.succeeded);
                ticket.resolve(message.succeeded);
            }
            None => {
                tracing::debug!(
                    "remote session on {} completed but was no longer tracked",
                    connection
                );
            }
        }
    }

    fn on_coordinate_state_received(
        &self,
        connection: &NetworkConnection,
        reader: &mut MessageReader<'_>,
    ) {
        let Some(participant) = self.participant(connection.id()) else {
            tracing::warn!("coordinate state received for missing participant {}", connection);
            return;
        };
        if let Err(e) = participant.read_coordinate_state(reader) {
            tracing::warn!("malformed coordinate state from {}: {}", connection, e);
        }
    }

    fn on_supported_localizers_received(
        &self,
        connection: &NetworkConnection,
        reader: &mut MessageReader<'_>,
    ) {
        let Some(participant) = self.participant(connection.id()) else {
            tracing::warn!(
                "supported localizers received for missing participant {}",
                connection
            );
            return;
        };
        if let Err(e) = participant.read_supported_localizers(reader) {
            tracing::warn!("malformed supported localizers from {}: {}", connection, e);
        }
    }

    fn on_participant_data_received(
        &self,
        connection: &NetworkConnection,
        reader: &mut MessageReader<'_>,
    ) {
        let Some(participant) = self.participant(connection.id()) else {
            tracing::error!(
                "session data received for missing participant {}",
                connection
            );
            return;
        };
        let Some(session) = participant.current_session() else {
            tracing::error!(
                "session data received for participant {} with no running session",
                connection
            );
            return;
        };
        session.on_data_received(reader);
    }
}
