//! Shared-anchor localizer
//!
//! Symmetric handover: the host side creates a persistent anchor at its
//! current device pose and transmits the anchor id in-session; the
//! observer side waits for the id, locates the anchor in its own store,
//! and confirms. Both sides end up holding the same anchor as their
//! shared frame.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use align_core::{AlignError, AlignResult, CancellationToken, LocalizerId};
use align_coordinator::{
    LocalizationSession, PeerHandle, SpatialCoordinate, SpatialLocalizer,
};
use align_wire::{MessageReader, MessageWriter};

use crate::detector::{AnchorStore, PoseSource};

pub const SHARED_ANCHOR_LOCALIZER_ID: LocalizerId =
    LocalizerId::new(0x08E3_71AD_F60B_42D5_A9C4_1B8F_25D0_93CE_u128);

/// In-session data sub-commands.
const DATA_ANCHOR_ID: &str = "ANCHORID";
const DATA_ANCHOR_FOUND: &str = "ANCHORFOUND";

/// How often the observer re-checks its store while the anchor imports.
const LOCATE_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Which half of the handover this session runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SharedAnchorRole {
    /// Create the anchor and transmit its id.
    Host,
    /// Wait for the id and locate the anchor.
    Observer,
}

/// Settings for [`SharedAnchorLocalizer`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SharedAnchorLocalizerSettings {
    pub role: SharedAnchorRole,
}

impl SharedAnchorLocalizerSettings {
    pub fn serialize(&self, writer: &mut MessageWriter) {
        writer.write_u8(match self.role {
            SharedAnchorRole::Host => 0,
            SharedAnchorRole::Observer => 1,
        });
    }

    pub fn deserialize(reader: &mut MessageReader<'_>) -> AlignResult<Self> {
        let role = match reader.read_u8()? {
            0 => SharedAnchorRole::Host,
            1 => SharedAnchorRole::Observer,
            other => {
                return Err(AlignError::InvalidSettings(format!(
                    "unknown shared anchor role: {other}"
                )))
            }
        };
        Ok(SharedAnchorLocalizerSettings { role })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = MessageWriter::new();
        self.serialize(&mut writer);
        writer.into_bytes()
    }
}

/// Localizer that shares a frame through a persisted anchor.
pub struct SharedAnchorLocalizer {
    store: Arc<dyn AnchorStore>,
    pose_source: Arc<dyn PoseSource>,
}

impl SharedAnchorLocalizer {
    pub fn new(store: Arc<dyn AnchorStore>, pose_source: Arc<dyn PoseSource>) -> Self {
        SharedAnchorLocalizer { store, pose_source }
    }
}

impl SpatialLocalizer for SharedAnchorLocalizer {
    fn id(&self) -> LocalizerId {
        SHARED_ANCHOR_LOCALIZER_ID
    }

    fn display_name(&self) -> &str {
        "Shared Anchor"
    }

    fn create_session(
        &self,
        peer: PeerHandle,
        settings: &mut MessageReader<'_>,
    ) -> AlignResult<Arc<dyn LocalizationSession>> {
        let settings = SharedAnchorLocalizerSettings::deserialize(settings)
            .map_err(|e| AlignError::InvalidSettings(e.to_string()))?;

        let (assigned_tx, _) = watch::channel(None);
        let (confirmed_tx, _) = watch::channel(false);
        Ok(Arc::new(SharedAnchorSession {
            store: self.store.clone(),
            pose_source: self.pose_source.clone(),
            role: settings.role,
            peer,
            assigned_id: assigned_tx,
            confirmed: confirmed_tx,
        }))
    }
}

struct SharedAnchorSession {
    store: Arc<dyn AnchorStore>,
    pose_source: Arc<dyn PoseSource>,
    role: SharedAnchorRole,
    peer: PeerHandle,
    /// Anchor id handed over by the host; observer side resolves on it.
    assigned_id: watch::Sender<Option<String>>,
    /// Observer's confirmation; host side resolves on it.
    confirmed: watch::Sender<bool>,
}

impl SharedAnchorSession {
    async fn localize_as_host(
        &self,
        token: &CancellationToken,
    ) -> Option<Arc<dyn SpatialCoordinate>> {
        let pose = self.pose_source.device_pose();
        let anchor_id = format!("anchor-{:016x}", rand::random::<u64>());
        let coordinate = match self.store.create_anchor(&anchor_id, pose) {
            Ok(coordinate) => coordinate,
            Err(e) => {
                tracing::error!("failed to create shared anchor: {}", e);
                return None;
            }
        };

        tracing::debug!("sharing anchor id {}", anchor_id);
        self.peer.send_data(|writer| {
            writer.write_string(DATA_ANCHOR_ID)?;
            writer.write_string(&anchor_id)
        });

        // Hold the session open until the observer confirms, so a shared
        // frame only counts once both sides have it.
        let mut confirmed = self.confirmed.subscribe();
        loop {
            if *confirmed.borrow_and_update() {
                return Some(coordinate);
            }
            tokio::select! {
                _ = token.cancelled() => {
                    self.store.delete_anchor(&anchor_id);
                    return None;
                }
                changed = confirmed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    async fn localize_as_observer(
        &self,
        token: &CancellationToken,
    ) -> Option<Arc<dyn SpatialCoordinate>> {
        let mut assigned = self.assigned_id.subscribe();
        let anchor_id = loop {
            if let Some(id) = assigned.borrow_and_update().clone() {
                break id;
            }
            tokio::select! {
                _ = token.cancelled() => return None,
                changed = assigned.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        };

        tracing::debug!("locating shared anchor {}", anchor_id);
        loop {
            if let Some(coordinate) = self.store.try_get_anchor(&anchor_id) {
                self.peer.send_data(|writer| {
                    writer.write_string(DATA_ANCHOR_FOUND)?;
                    writer.write_string(&anchor_id)
                });
                return Some(coordinate);
            }
            tokio::select! {
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(LOCATE_RETRY_INTERVAL) => {}
            }
        }
    }
}

#[async_trait]
impl LocalizationSession for SharedAnchorSession {
    async fn localize(&self, token: CancellationToken) -> Option<Arc<dyn SpatialCoordinate>> {
        match self.role {
            SharedAnchorRole::Host => self.localize_as_host(&token).await,
            SharedAnchorRole::Observer => self.localize_as_observer(&token).await,
        }
    }

    fn on_data_received(&self, reader: &mut MessageReader<'_>) {
        let sub_command = match reader.read_string() {
            Ok(sub_command) => sub_command,
            Err(e) => {
                tracing::warn!("malformed shared anchor data frame: {}", e);
                return;
            }
        };

        match sub_command.as_str() {
            DATA_ANCHOR_ID => match reader.read_string() {
                Ok(id) => {
                    self.assigned_id.send_if_modified(|current| {
                        if current.is_none() {
                            *current = Some(id);
                            true
                        } else {
                            false
                        }
                    });
                }
                Err(e) => tracing::warn!("malformed anchor id frame: {}", e),
            },
            DATA_ANCHOR_FOUND => {
                self.confirmed.send_replace(true);
            }
            other => {
                tracing::debug!("unknown shared anchor data frame: {}", other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip() {
        for role in [SharedAnchorRole::Host, SharedAnchorRole::Observer] {
            let settings = SharedAnchorLocalizerSettings { role };
            let bytes = settings.to_bytes();
            let decoded =
                SharedAnchorLocalizerSettings::deserialize(&mut MessageReader::new(&bytes))
                    .unwrap();
            assert_eq!(decoded, settings);
        }
    }

    #[test]
    fn test_unknown_role_rejected() {
        let bytes = [9u8];
        assert!(
            SharedAnchorLocalizerSettings::deserialize(&mut MessageReader::new(&bytes)).is_err()
        );
    }
}
