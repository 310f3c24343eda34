//! Collaborator contracts and marker discovery
//!
//! The actual computer-vision and platform-anchor machinery lives outside
//! this crate; localizers consume it through these traits. The
//! `MarkerCoordinateService` turns a stream of marker observations into
//! known spatial coordinates, with cooperative cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use align_core::{AlignResult, CancellationToken, Pose};
use align_coordinator::{SpatialCoordinate, WorldPoseCoordinate};

/// Physical marker detector (ArUco, QR, ...). Implementations publish the
/// currently visible markers and their world-space poses through the watch
/// channel whenever detection updates.
pub trait MarkerDetector: Send + Sync {
    fn start_detecting(&self);

    fn stop_detecting(&self);

    /// Physical edge length, in meters, the detector should assume.
    fn set_marker_size(&self, size: f32);

    /// Subscribe to marker observations: map of marker id to world pose.
    fn markers(&self) -> watch::Receiver<HashMap<i32, Pose>>;

    fn try_get_marker_size(&self, marker_id: i32) -> Option<f32>;
}

/// Source of the local device's own pose in world space.
pub trait PoseSource: Send + Sync {
    fn device_pose(&self) -> Pose;
}

/// Persistent spatial anchor store.
pub trait AnchorStore: Send + Sync {
    fn create_anchor(&self, id: &str, pose: Pose) -> AlignResult<Arc<dyn SpatialCoordinate>>;

    fn try_get_anchor(&self, id: &str) -> Option<Arc<dyn SpatialCoordinate>>;

    fn delete_anchor(&self, id: &str) -> bool;
}

/// Discovery helper over a [`MarkerDetector`]: watches observations until
/// every requested marker id has been seen. Detection is stopped again when
/// discovery ends or the service is dropped.
pub struct MarkerCoordinateService {
    detector: Arc<dyn MarkerDetector>,
    known: Mutex<HashMap<i32, Arc<dyn SpatialCoordinate>>>,
}

impl MarkerCoordinateService {
    pub fn new(detector: Arc<dyn MarkerDetector>) -> Self {
        MarkerCoordinateService {
            detector,
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Watch marker observations until all of `marker_ids` are known or the
    /// token cancels. Returns whether all were found.
    pub async fn discover(&self, marker_ids: &[i32], token: &CancellationToken) -> bool {
        let mut observations = self.detector.markers();
        self.detector.start_detecting();

        let found_all = loop {
            {
                let snapshot = observations.borrow_and_update().clone();
                let mut known = self.known.lock();
                for (id, pose) in snapshot {
                    if marker_ids.contains(&id) {
                        known.insert(
                            id,
                            Arc::new(WorldPoseCoordinate::new(id.to_string(), pose)),
                        );
                    }
                }
                if marker_ids.iter().all(|id| known.contains_key(id)) {
                    break true;
                }
            }

            tokio::select! {
                _ = token.cancelled() => break false,
                changed = observations.changed() => {
                    if changed.is_err() {
                        tracing::warn!("marker detector dropped its observation channel");
                        break false;
                    }
                }
            }
        };

        self.detector.stop_detecting();
        found_all
    }

    /// A coordinate for a marker already seen by `discover`.
    pub fn try_get_known_coordinate(&self, marker_id: i32) -> Option<Arc<dyn SpatialCoordinate>> {
        self.known.lock().get(&marker_id).cloned()
    }
}

impl Drop for MarkerCoordinateService {
    fn drop(&mut self) {
        self.detector.stop_detecting();
    }
}
