//! Device tracking observation
//!
//! The coordinator does not know how the device tracks its environment;
//! whatever does implements this and registers with the coordinator.

use align_core::TrackingState;

/// Source of the local device's tracking status.
pub trait TrackingObserver: Send + Sync {
    fn tracking_state(&self) -> TrackingState;
}

/// Observer that always reports one fixed state. Useful for platforms
/// without a tracking concept and for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedTrackingObserver(pub TrackingState);

impl TrackingObserver for FixedTrackingObserver {
    fn tracking_state(&self) -> TrackingState {
        self.0
    }
}
