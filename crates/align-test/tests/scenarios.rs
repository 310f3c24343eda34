//! End-to-end negotiation scenarios
//!
//! Drives whole coordinators against each other - over in-memory pairs and
//! over real localhost TCP - and checks the externally visible protocol
//! behavior.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use align_core::{CancellationToken, LocalizerId, Pose, TrackingState, Vec3};
use align_coordinator::{
    FixedTrackingObserver, ParticipantEvent, SpatialCoordinator,
};
use align_test::{
    memory_pair, CoordinatorHarness, FixedCoordinateLocalizer, MemoryAnchorStore, NeverLocalizer,
    ScriptedPoseSource,
};
use align_transport::{ConnectionConfig, ConnectionEvent, ConnectionManager};
use align_wire::COMMAND_COORDINATE_STATE;
use align_localizers::{
    SharedAnchorLocalizer, SharedAnchorLocalizerSettings, SharedAnchorRole,
    SHARED_ANCHOR_LOCALIZER_ID,
};

const FIXED_ID: LocalizerId = LocalizerId::new(0xA1);
const OTHER_FIXED_ID: LocalizerId = LocalizerId::new(0xA2);
const NEVER_ID: LocalizerId = LocalizerId::new(0xA3);

fn fixed_pose() -> Pose {
    Pose::new(Vec3::new(1.0, 2.0, 3.0), Default::default())
}

/// Scenario A: on connect, the server-side coordinator announces exactly
/// the registered localizer ids - checked over real TCP.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn supported_localizers_announced_on_connect() {
    let server_coordinator = SpatialCoordinator::new();
    server_coordinator
        .register_localizer(Arc::new(FixedCoordinateLocalizer::new(FIXED_ID, fixed_pose())))
        .unwrap();
    server_coordinator
        .register_localizer(Arc::new(FixedCoordinateLocalizer::new(
            OTHER_FIXED_ID,
            fixed_pose(),
        )))
        .unwrap();
    let mut server_events = server_coordinator.subscribe();

    let client_coordinator = SpatialCoordinator::new();

    let mut server_manager = ConnectionManager::new(ConnectionConfig::default());
    let mut client_manager = ConnectionManager::new(ConnectionConfig::default());
    let port = server_manager.start_listening(0).unwrap();
    client_manager.connect_to("127.0.0.1", port);

    // Pump both sides until the client knows the server's localizers.
    let mut announced = None;
    for _ in 0..200 {
        server_coordinator.pump(&mut server_manager);
        client_coordinator.pump(&mut client_manager);

        if let Some(participant) = client_coordinator.participants().into_iter().next() {
            if let Ok(Some(ids)) = tokio::time::timeout(
                Duration::from_millis(10),
                participant.peer_supported_localizers(),
            )
            .await
            {
                announced = Some(ids);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(
        announced.expect("client never learned the server's localizers"),
        HashSet::from([FIXED_ID, OTHER_FIXED_ID])
    );

    // The server observed the participant connect.
    assert!(matches!(
        server_events.try_recv(),
        Ok(ParticipantEvent::Connected(_))
    ));

    client_manager.disconnect_all();
    server_manager.disconnect_all();
    server_manager.stop_listening();
}

/// Scenario B: localizing with a registered localizer resolves the
/// participant's coordinate at the session's pose.
#[tokio::test]
async fn localize_resolves_fixed_coordinate() {
    let coordinator = SpatialCoordinator::new();
    coordinator
        .register_localizer(Arc::new(FixedCoordinateLocalizer::new(FIXED_ID, fixed_pose())))
        .unwrap();
    let harness = CoordinatorHarness::connect_with(coordinator);

    let succeeded = harness
        .coordinator
        .localize(&harness.connection, FIXED_ID, &[])
        .await;
    assert!(succeeded);

    let participant = harness
        .coordinator
        .participant(harness.connection.id())
        .unwrap();
    let coordinate = participant.coordinate().unwrap();
    assert_eq!(
        coordinate.coordinate_to_world_point(Vec3::ZERO),
        Vec3::new(1.0, 2.0, 3.0)
    );
}

/// Scenario C: an unregistered localizer id fails fast without creating a
/// session.
#[tokio::test]
async fn localize_with_unknown_id_fails() {
    let harness = CoordinatorHarness::connect();

    let succeeded = harness
        .coordinator
        .localize(&harness.connection, LocalizerId::new(0xDEAD), &[])
        .await;
    assert!(!succeeded);

    let participant = harness
        .coordinator
        .participant(harness.connection.id())
        .unwrap();
    assert!(!participant.is_locating());
    assert!(participant.coordinate().is_none());
}

/// Scenario D: peer disconnect cancels the bound session and removes the
/// participant before the next tick.
#[tokio::test]
async fn disconnect_cancels_bound_session() {
    let never = Arc::new(NeverLocalizer::new(NEVER_ID));
    let coordinator = SpatialCoordinator::new();
    coordinator.register_localizer(never.clone()).unwrap();
    let mut harness = CoordinatorHarness::connect_with(coordinator.clone());

    let connection = harness.connection.clone();
    let pending = {
        let coordinator = coordinator.clone();
        let connection = connection.clone();
        tokio::spawn(async move { coordinator.localize(&connection, NEVER_ID, &[]).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(coordinator
        .participant(connection.id())
        .unwrap()
        .is_locating());

    harness.disconnect_peer();

    assert!(coordinator.participant(connection.id()).is_none());
    assert!(!pending.await.unwrap());
    assert!(never.was_cancelled());
    assert!(matches!(
        harness.events.try_recv(),
        Ok(ParticipantEvent::Connected(_))
    ));
    assert!(matches!(
        harness.events.try_recv(),
        Ok(ParticipantEvent::Disconnected(_))
    ));
}

/// Scenario E: back-to-back identical state snapshots produce exactly one
/// send on the underlying connection.
#[tokio::test]
async fn identical_state_snapshots_send_once() {
    let coordinator = SpatialCoordinator::new();
    coordinator.register_tracking_observer(Arc::new(FixedTrackingObserver(
        TrackingState::Tracking,
    )));
    let mut harness = CoordinatorHarness::connect_with(coordinator);

    harness.pump().await;
    harness.pump().await;

    let commands = harness.wire.drain_commands().await;
    assert_eq!(
        commands
            .iter()
            .filter(|c| *c == COMMAND_COORDINATE_STATE)
            .count(),
        1
    );
}

/// Full remote round trip over a memory pair: one coordinator asks the
/// other to localize, the other runs the session and reports back.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_localization_round_trip() {
    let requester = SpatialCoordinator::new();
    let responder = SpatialCoordinator::new();
    responder
        .register_localizer(Arc::new(FixedCoordinateLocalizer::new(FIXED_ID, fixed_pose())))
        .unwrap();

    let (mut side_a, mut side_b) = memory_pair(1, 2);
    let connection_a = side_a.connection.clone();
    requester.process_event(ConnectionEvent::Connected(connection_a.clone()));
    responder.process_event(ConnectionEvent::Connected(side_b.connection.clone()));

    // Background pump shuttling frames into both coordinators.
    let stop = CancellationToken::new();
    let pump = {
        let requester = requester.clone();
        let responder = responder.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            while !stop.is_cancelled() {
                for message in side_a.drain_messages().await {
                    requester.process_event(ConnectionEvent::Message(message));
                }
                for message in side_b.drain_messages().await {
                    responder.process_event(ConnectionEvent::Message(message));
                }
            }
        })
    };

    let ticket = requester.run_remote_localization(&connection_a, FIXED_ID, Vec::new());
    let result = tokio::time::timeout(Duration::from_secs(5), ticket.wait())
        .await
        .expect("remote localization timed out");
    assert!(matches!(result, Ok(true)));

    // The responder resolved its own participant's coordinate.
    let responder_participant = responder.participants().into_iter().next().unwrap();
    assert_eq!(
        responder_participant
            .coordinate()
            .unwrap()
            .world_pose()
            .position,
        Vec3::new(1.0, 2.0, 3.0)
    );

    stop.cancel();
    pump.await.unwrap();
}

/// Shared-anchor handover between two coordinators: the host creates and
/// announces an anchor, the observer locates it and confirms.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shared_anchor_handover() {
    let store = MemoryAnchorStore::new();
    let host_pose = Pose::new(Vec3::new(0.5, 0.0, -1.0), Default::default());

    let host = SpatialCoordinator::new();
    host.register_localizer(Arc::new(SharedAnchorLocalizer::new(
        Arc::new(store.clone()),
        Arc::new(ScriptedPoseSource(host_pose)),
    )))
    .unwrap();

    let observer = SpatialCoordinator::new();
    observer
        .register_localizer(Arc::new(SharedAnchorLocalizer::new(
            Arc::new(store.clone()),
            Arc::new(ScriptedPoseSource(Pose::IDENTITY)),
        )))
        .unwrap();

    let (mut side_h, mut side_o) = memory_pair(1, 2);
    let host_connection = side_h.connection.clone();
    let observer_connection = side_o.connection.clone();
    host.process_event(ConnectionEvent::Connected(host_connection.clone()));
    observer.process_event(ConnectionEvent::Connected(observer_connection.clone()));

    let stop = CancellationToken::new();
    let pump = {
        let host = host.clone();
        let observer = observer.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            while !stop.is_cancelled() {
                for message in side_h.drain_messages().await {
                    host.process_event(ConnectionEvent::Message(message));
                }
                for message in side_o.drain_messages().await {
                    observer.process_event(ConnectionEvent::Message(message));
                }
            }
        })
    };

    let host_settings = SharedAnchorLocalizerSettings {
        role: SharedAnchorRole::Host,
    };
    let observer_settings = SharedAnchorLocalizerSettings {
        role: SharedAnchorRole::Observer,
    };

    // The observer must have its session bound before the host announces
    // the anchor id; a data frame with no bound session is dropped.
    let observer_run = {
        let observer = observer.clone();
        let connection = observer_connection.clone();
        let settings = observer_settings.to_bytes();
        tokio::spawn(async move {
            observer
                .localize(&connection, SHARED_ANCHOR_LOCALIZER_ID, &settings)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let host_run = {
        let host = host.clone();
        let connection = host_connection.clone();
        let settings = host_settings.to_bytes();
        tokio::spawn(async move {
            host.localize(&connection, SHARED_ANCHOR_LOCALIZER_ID, &settings)
                .await
        })
    };

    let host_succeeded = tokio::time::timeout(Duration::from_secs(5), host_run)
        .await
        .expect("host session timed out")
        .unwrap();
    let observer_succeeded = tokio::time::timeout(Duration::from_secs(5), observer_run)
        .await
        .expect("observer session timed out")
        .unwrap();

    assert!(host_succeeded);
    assert!(observer_succeeded);
    assert_eq!(store.len(), 1);

    // Both participants hold the same anchor frame.
    let host_coordinate = host
        .participant(host_connection.id())
        .unwrap()
        .coordinate()
        .unwrap();
    let observer_coordinate = observer
        .participant(observer_connection.id())
        .unwrap()
        .coordinate()
        .unwrap();
    assert_eq!(host_coordinate.id(), observer_coordinate.id());
    assert_eq!(host_coordinate.world_pose().position, host_pose.position);

    stop.cancel();
    pump.await.unwrap();
}
