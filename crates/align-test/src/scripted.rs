//! Scripted collaborator doubles
//!
//! Deterministic implementations of the localizer collaborator traits and
//! two synthetic localizers: one that always resolves a fixed coordinate
//! and one that never completes until cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use align_core::{AlignError, AlignResult, CancellationToken, LocalizerId, Pose};
use align_coordinator::{
    LocalizationSession, PeerHandle, SpatialCoordinate, SpatialLocalizer, WorldPoseCoordinate,
};
use align_localizers::{AnchorStore, MarkerDetector, PoseSource};
use align_wire::MessageReader;

/// Marker detector whose observations are published by the test script.
pub struct ScriptedDetector {
    observations: watch::Sender<HashMap<i32, Pose>>,
    detecting: AtomicBool,
    marker_size: Mutex<Option<f32>>,
}

impl ScriptedDetector {
    pub fn new() -> Arc<Self> {
        let (observations, _) = watch::channel(HashMap::new());
        Arc::new(ScriptedDetector {
            observations,
            detecting: AtomicBool::new(false),
            marker_size: Mutex::new(None),
        })
    }

    /// Publish a new set of visible markers.
    pub fn publish(&self, markers: HashMap<i32, Pose>) {
        self.observations.send_replace(markers);
    }

    pub fn is_detecting(&self) -> bool {
        self.detecting.load(Ordering::SeqCst)
    }
}

impl MarkerDetector for ScriptedDetector {
    fn start_detecting(&self) {
        self.detecting.store(true, Ordering::SeqCst);
    }

    fn stop_detecting(&self) {
        self.detecting.store(false, Ordering::SeqCst);
    }

    fn set_marker_size(&self, size: f32) {
        *self.marker_size.lock() = Some(size);
    }

    fn markers(&self) -> watch::Receiver<HashMap<i32, Pose>> {
        self.observations.subscribe()
    }

    fn try_get_marker_size(&self, _marker_id: i32) -> Option<f32> {
        *self.marker_size.lock()
    }
}

/// Pose source reporting one fixed device pose.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedPoseSource(pub Pose);

impl PoseSource for ScriptedPoseSource {
    fn device_pose(&self) -> Pose {
        self.0
    }
}

/// Anchor store over a plain shared map. Cloning the handle shares the
/// map, which stands in for cloud-synced stores on two devices.
#[derive(Clone, Default)]
pub struct MemoryAnchorStore {
    anchors: Arc<Mutex<HashMap<String, Arc<dyn SpatialCoordinate>>>>,
}

impl MemoryAnchorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.anchors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.lock().is_empty()
    }
}

impl AnchorStore for MemoryAnchorStore {
    fn create_anchor(&self, id: &str, pose: Pose) -> AlignResult<Arc<dyn SpatialCoordinate>> {
        let mut anchors = self.anchors.lock();
        if anchors.contains_key(id) {
            return Err(AlignError::InvalidSettings(format!(
                "anchor {id} already exists"
            )));
        }
        let coordinate: Arc<dyn SpatialCoordinate> =
            Arc::new(WorldPoseCoordinate::new(id.to_string(), pose));
        anchors.insert(id.to_string(), coordinate.clone());
        Ok(coordinate)
    }

    fn try_get_anchor(&self, id: &str) -> Option<Arc<dyn SpatialCoordinate>> {
        self.anchors.lock().get(id).cloned()
    }

    fn delete_anchor(&self, id: &str) -> bool {
        self.anchors.lock().remove(id).is_some()
    }
}

/// Localizer whose sessions immediately resolve a fixed coordinate.
pub struct FixedCoordinateLocalizer {
    pub localizer_id: LocalizerId,
    pub pose: Pose,
}

impl FixedCoordinateLocalizer {
    pub fn new(localizer_id: LocalizerId, pose: Pose) -> Self {
        FixedCoordinateLocalizer { localizer_id, pose }
    }
}

impl SpatialLocalizer for FixedCoordinateLocalizer {
    fn id(&self) -> LocalizerId {
        self.localizer_id
    }

    fn display_name(&self) -> &str {
        "Fixed Coordinate"
    }

    fn create_session(
        &self,
        _peer: PeerHandle,
        _settings: &mut MessageReader<'_>,
    ) -> AlignResult<Arc<dyn LocalizationSession>> {
        Ok(Arc::new(FixedCoordinateSession { pose: self.pose }))
    }
}

struct FixedCoordinateSession {
    pose: Pose,
}

#[async_trait]
impl LocalizationSession for FixedCoordinateSession {
    async fn localize(&self, _token: CancellationToken) -> Option<Arc<dyn SpatialCoordinate>> {
        Some(Arc::new(WorldPoseCoordinate::new("fixed", self.pose)))
    }

    fn on_data_received(&self, _reader: &mut MessageReader<'_>) {}
}

/// Localizer whose sessions pend until cancelled, then report whether the
/// cancellation was observed.
pub struct NeverLocalizer {
    pub localizer_id: LocalizerId,
    cancelled: Arc<AtomicBool>,
}

impl NeverLocalizer {
    pub fn new(localizer_id: LocalizerId) -> Self {
        NeverLocalizer {
            localizer_id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once a session of this localizer observed cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl SpatialLocalizer for NeverLocalizer {
    fn id(&self) -> LocalizerId {
        self.localizer_id
    }

    fn display_name(&self) -> &str {
        "Never"
    }

    fn create_session(
        &self,
        _peer: PeerHandle,
        _settings: &mut MessageReader<'_>,
    ) -> AlignResult<Arc<dyn LocalizationSession>> {
        Ok(Arc::new(NeverSession {
            cancelled: self.cancelled.clone(),
        }))
    }
}

struct NeverSession {
    cancelled: Arc<AtomicBool>,
}

#[async_trait]
impl LocalizationSession for NeverSession {
    async fn localize(&self, token: CancellationToken) -> Option<Arc<dyn SpatialCoordinate>> {
        token.cancelled().await;
        self.cancelled.store(true, Ordering::SeqCst);
        None
    }

    fn on_data_received(&self, _reader: &mut MessageReader<'_>) {}
}
