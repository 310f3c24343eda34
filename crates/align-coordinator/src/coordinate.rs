//! Spatial coordinates
//!
//! A coordinate is an opaque, algorithm-specific reference frame with a
//! location state and a pose transform between local world space and the
//! coordinate's own space. Sessions create coordinates; each participant
//! holds at most one, replaced wholesale on re-localization.

use align_core::{LocatedState, Pose, Quat, Vec3};

/// One shared reference frame as produced by a localization session.
pub trait SpatialCoordinate: Send + Sync {
    /// Algorithm-specific identity (marker id, anchor id, ...).
    fn id(&self) -> String;

    /// Current location state of this coordinate.
    fn state(&self) -> LocatedState;

    /// Pose of the coordinate origin expressed in local world space.
    fn world_pose(&self) -> Pose;

    fn coordinate_to_world_point(&self, point: Vec3) -> Vec3 {
        self.world_pose().transform_point(point)
    }

    fn coordinate_to_world_rotation(&self, rotation: Quat) -> Quat {
        self.world_pose().transform_rotation(rotation)
    }

    fn world_to_coordinate_point(&self, point: Vec3) -> Vec3 {
        self.world_pose().inverse().transform_point(point)
    }

    fn world_to_coordinate_rotation(&self, rotation: Quat) -> Quat {
        self.world_pose().inverse().transform_rotation(rotation)
    }
}

/// A coordinate fully described by a world-space pose, for localizers that
/// derive their frame geometrically rather than tracking a native anchor.
#[derive(Debug, Clone)]
pub struct WorldPoseCoordinate {
    id: String,
    pose: Pose,
    state: LocatedState,
}

impl WorldPoseCoordinate {
    pub fn new(id: impl Into<String>, pose: Pose) -> Self {
        WorldPoseCoordinate {
            id: id.into(),
            pose,
            state: LocatedState::Tracking,
        }
    }

    pub fn with_state(mut self, state: LocatedState) -> Self {
        self.state = state;
        self
    }
}

impl SpatialCoordinate for WorldPoseCoordinate {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn state(&self) -> LocatedState {
        self.state
    }

    fn world_pose(&self) -> Pose {
        self.pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_pose_coordinate_transforms() {
        let pose = Pose::new(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY);
        let coordinate = WorldPoseCoordinate::new("c0", pose);

        assert_eq!(
            coordinate.coordinate_to_world_point(Vec3::ZERO),
            Vec3::new(1.0, 2.0, 3.0)
        );
        assert_eq!(
            coordinate.world_to_coordinate_point(Vec3::new(1.0, 2.0, 3.0)),
            Vec3::ZERO
        );
        assert!(coordinate.state().is_located());
    }
}
