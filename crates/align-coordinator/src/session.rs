//! Localizer and session contracts
//!
//! A localizer is a named, registered algorithm capable of producing a
//! shared coordinate between two peers. A session is one in-flight run of
//! a localizer against one participant. The coordinator never looks inside
//! localizer settings; each localizer deserializes its own and builds the
//! session itself.

use std::sync::Arc;

use async_trait::async_trait;

use align_core::{AlignResult, CancellationToken, LocalizerId};
use align_transport::NetworkConnection;
use align_wire::{write_command_header, MessageReader, MessageWriter, COMMAND_LOCALIZATION_DATA};

use crate::coordinate::SpatialCoordinate;

/// The peer-facing surface handed to a session: lets the two halves of one
/// localization session exchange opaque data frames through the
/// coordinator's `LOCDATA` command.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    connection: NetworkConnection,
}

impl PeerHandle {
    pub fn new(connection: NetworkConnection) -> Self {
        PeerHandle { connection }
    }

    pub fn connection(&self) -> &NetworkConnection {
        &self.connection
    }

    /// Send one in-session data frame. The callback writes the
    /// session-defined payload; the envelope is added here.
    pub fn send_data<F>(&self, write: F)
    where
        F: FnOnce(&mut MessageWriter) -> AlignResult<()>,
    {
        let mut writer = MessageWriter::new();
        let result = write_command_header(&mut writer, COMMAND_LOCALIZATION_DATA)
            .and_then(|_| write(&mut writer));
        match result {
            Ok(()) => self.connection.send(&writer.into_bytes()),
            Err(e) => {
                tracing::warn!("failed to build session data frame: {}", e);
            }
        }
    }
}

/// One asynchronous localization attempt.
///
/// `localize` runs to completion or responds to cancellation, and is called
/// exactly once per session instance. `on_data_received` delivers opaque
/// frames from the peer half of this same session; implementations
/// typically resolve an internal completion signal here so `localize` can
/// await peer-driven events without polling.
#[async_trait]
pub trait LocalizationSession: Send + Sync {
    async fn localize(&self, token: CancellationToken) -> Option<Arc<dyn SpatialCoordinate>>;

    fn on_data_received(&self, reader: &mut MessageReader<'_>);
}

/// A registered localization algorithm.
pub trait SpatialLocalizer: Send + Sync {
    /// Unique identity of this algorithm. Duplicate registration is an
    /// error.
    fn id(&self) -> LocalizerId;

    /// Human-readable name for logs.
    fn display_name(&self) -> &str;

    /// Whether this algorithm can run on the current platform.
    fn is_supported(&self) -> bool {
        true
    }

    /// Deserialize the settings off the reader and build a session bound to
    /// `peer`. Rejecting the settings is an error result, not a panic.
    fn create_session(
        &self,
        peer: PeerHandle,
        settings: &mut MessageReader<'_>,
    ) -> AlignResult<Arc<dyn LocalizationSession>>;
}
