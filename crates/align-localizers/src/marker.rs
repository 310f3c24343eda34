//! Single-marker localizer
//!
//! Both peers look at the same physical marker; whichever device runs this
//! session discovers the marker and adopts its pose as the shared frame.

use std::sync::Arc;

use async_trait::async_trait;

use align_core::{AlignError, AlignResult, CancellationToken, LocalizerId};
use align_coordinator::{LocalizationSession, PeerHandle, SpatialCoordinate, SpatialLocalizer};
use align_wire::{MessageReader, MessageWriter};

use crate::detector::{MarkerCoordinateService, MarkerDetector};

pub const MARKER_LOCALIZER_ID: LocalizerId =
    LocalizerId::new(0x5A1D_02E7_94C3_4F11_B20A_6ED8_33F7_01AA_u128);

/// Settings for [`MarkerLocalizer`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarkerLocalizerSettings {
    /// Id of the marker both devices look for.
    pub marker_id: i32,
    /// Physical marker edge length in meters.
    pub marker_size: f32,
}

impl Default for MarkerLocalizerSettings {
    fn default() -> Self {
        MarkerLocalizerSettings {
            marker_id: 0,
            marker_size: 0.1,
        }
    }
}

impl MarkerLocalizerSettings {
    pub fn serialize(&self, writer: &mut MessageWriter) {
        writer.write_i32(self.marker_id);
        writer.write_f32(self.marker_size);
    }

    pub fn deserialize(reader: &mut MessageReader<'_>) -> AlignResult<Self> {
        Ok(MarkerLocalizerSettings {
            marker_id: reader.read_i32()?,
            marker_size: reader.read_f32()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = MessageWriter::new();
        self.serialize(&mut writer);
        writer.into_bytes()
    }
}

/// Localizer that resolves the shared frame from one physical marker.
pub struct MarkerLocalizer {
    detector: Arc<dyn MarkerDetector>,
}

impl MarkerLocalizer {
    pub fn new(detector: Arc<dyn MarkerDetector>) -> Self {
        MarkerLocalizer { detector }
    }
}

impl SpatialLocalizer for MarkerLocalizer {
    fn id(&self) -> LocalizerId {
        MARKER_LOCALIZER_ID
    }

    fn display_name(&self) -> &str {
        "Marker"
    }

    fn create_session(
        &self,
        _peer: PeerHandle,
        settings: &mut MessageReader<'_>,
    ) -> AlignResult<Arc<dyn LocalizationSession>> {
        let settings = MarkerLocalizerSettings::deserialize(settings)
            .map_err(|e| AlignError::InvalidSettings(e.to_string()))?;

        self.detector.set_marker_size(settings.marker_size);
        Ok(Arc::new(MarkerSession {
            service: MarkerCoordinateService::new(self.detector.clone()),
            settings,
        }))
    }
}

struct MarkerSession {
    service: MarkerCoordinateService,
    settings: MarkerLocalizerSettings,
}

#[async_trait]
impl LocalizationSession for MarkerSession {
    async fn localize(&self, token: CancellationToken) -> Option<Arc<dyn SpatialCoordinate>> {
        if !self.service.discover(&[self.settings.marker_id], &token).await {
            tracing::debug!("marker discovery ended without finding marker {}", self.settings.marker_id);
            return None;
        }

        let coordinate = self.service.try_get_known_coordinate(self.settings.marker_id);
        if coordinate.is_none() {
            tracing::error!("unexpected failure to resolve a discovered marker coordinate");
        }
        coordinate
    }

    fn on_data_received(&self, _reader: &mut MessageReader<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip() {
        let settings = MarkerLocalizerSettings {
            marker_id: 7,
            marker_size: 0.25,
        };
        let bytes = settings.to_bytes();
        let decoded = MarkerLocalizerSettings::deserialize(&mut MessageReader::new(&bytes)).unwrap();
        assert_eq!(decoded, settings);
    }

    #[test]
    fn test_truncated_settings_rejected() {
        let bytes = [0u8; 2];
        assert!(MarkerLocalizerSettings::deserialize(&mut MessageReader::new(&bytes)).is_err());
    }
}
