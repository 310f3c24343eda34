//! Three-marker geometric localizer
//!
//! Discovers three independently identified markers arranged in a T and
//! derives a single stable frame from their geometry: the origin is the
//! projection of the middle marker onto the top-bottom segment, the
//! orientation comes from the plane the three markers span.

use std::sync::Arc;

use async_trait::async_trait;

use align_core::{AlignError, AlignResult, CancellationToken, LocalizerId, Pose, Quat, Vec3};
use align_coordinator::{
    LocalizationSession, PeerHandle, SpatialCoordinate, SpatialLocalizer, WorldPoseCoordinate,
};
use align_wire::{MessageReader, MessageWriter};

use crate::detector::{MarkerCoordinateService, MarkerDetector};

pub const THREE_MARKER_LOCALIZER_ID: LocalizerId =
    LocalizerId::new(0xC47B_90D2_5E16_4A88_9F3C_7A02_D1E5_44B7_u128);

/// Settings for [`ThreeMarkerLocalizer`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThreeMarkerLocalizerSettings {
    pub top_marker_id: i32,
    pub middle_marker_id: i32,
    pub bottom_marker_id: i32,
    /// Physical marker edge length in meters.
    pub marker_size: f32,
}

impl Default for ThreeMarkerLocalizerSettings {
    fn default() -> Self {
        ThreeMarkerLocalizerSettings {
            top_marker_id: 0,
            middle_marker_id: 1,
            bottom_marker_id: 2,
            marker_size: 0.1,
        }
    }
}

impl ThreeMarkerLocalizerSettings {
    pub fn serialize(&self, writer: &mut MessageWriter) {
        writer.write_i32(self.top_marker_id);
        writer.write_i32(self.middle_marker_id);
        writer.write_i32(self.bottom_marker_id);
        writer.write_f32(self.marker_size);
    }

    pub fn deserialize(reader: &mut MessageReader<'_>) -> AlignResult<Self> {
        Ok(ThreeMarkerLocalizerSettings {
            top_marker_id: reader.read_i32()?,
            middle_marker_id: reader.read_i32()?,
            bottom_marker_id: reader.read_i32()?,
            marker_size: reader.read_f32()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = MessageWriter::new();
        self.serialize(&mut writer);
        writer.into_bytes()
    }
}

/// Derive the shared frame from three marker positions.
///
/// The origin sits at the T intersection: the middle marker projected onto
/// the top-bottom segment. The rotation looks along the normal of the
/// marker plane with the top-to-bottom direction as up.
pub fn derive_frame(top: Vec3, middle: Vec3, bottom: Vec3) -> Pose {
    let intersection = bottom.add(middle.sub(bottom).project_onto(top.sub(bottom)));

    // Winding order matters: it fixes which side of the plane the frame
    // faces.
    let normal = middle.sub(top).cross(bottom.sub(top)).normalized();
    let rotation = Quat::look_rotation(normal, bottom.sub(top));

    Pose::new(intersection, rotation)
}

/// Localizer that derives the shared frame from a three-marker arrangement.
pub struct ThreeMarkerLocalizer {
    detector: Arc<dyn MarkerDetector>,
}

impl ThreeMarkerLocalizer {
    pub fn new(detector: Arc<dyn MarkerDetector>) -> Self {
        ThreeMarkerLocalizer { detector }
    }
}

impl SpatialLocalizer for ThreeMarkerLocalizer {
    fn id(&self) -> LocalizerId {
        THREE_MARKER_LOCALIZER_ID
    }

    fn display_name(&self) -> &str {
        "Three Marker"
    }

    fn create_session(
        &self,
        _peer: PeerHandle,
        settings: &mut MessageReader<'_>,
    ) -> AlignResult<Arc<dyn LocalizationSession>> {
        let settings = ThreeMarkerLocalizerSettings::deserialize(settings)
            .map_err(|e| AlignError::InvalidSettings(e.to_string()))?;

        self.detector.set_marker_size(settings.marker_size);
        Ok(Arc::new(ThreeMarkerSession {
            service: MarkerCoordinateService::new(self.detector.clone()),
            settings,
        }))
    }
}

struct ThreeMarkerSession {
    service: MarkerCoordinateService,
    settings: ThreeMarkerLocalizerSettings,
}

#[async_trait]
impl LocalizationSession for ThreeMarkerSession {
    async fn localize(&self, token: CancellationToken) -> Option<Arc<dyn SpatialCoordinate>> {
        let ids = [
            self.settings.top_marker_id,
            self.settings.middle_marker_id,
            self.settings.bottom_marker_id,
        ];
        if !self.service.discover(&ids, &token).await {
            tracing::debug!("three-marker discovery ended before all markers were found");
            return None;
        }

        let positions: Vec<Vec3> = ids
            .iter()
            .filter_map(|id| {
                self.service
                    .try_get_known_coordinate(*id)
                    .map(|coordinate| coordinate.world_pose().position)
            })
            .collect();
        let [top, middle, bottom] = positions.as_slice() else {
            tracing::error!("unexpected failure to resolve a discovered marker coordinate");
            return None;
        };

        let frame = derive_frame(*top, *middle, *bottom);
        let id = format!(
            "three-marker:{}:{}:{}",
            self.settings.top_marker_id,
            self.settings.middle_marker_id,
            self.settings.bottom_marker_id
        );
        Some(Arc::new(WorldPoseCoordinate::new(id, frame)))
    }

    fn on_data_received(&self, _reader: &mut MessageReader<'_>) {}
}
