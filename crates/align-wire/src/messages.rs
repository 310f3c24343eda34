//! Typed command payloads
//!
//! Field order is fixed per command and versioned with the wire format;
//! every struct encodes to exactly the bytes its decoder expects.
//!
//! | command | payload |
//! |---|---|
//! | `SUPPORTLOC` | i32 count, then count x 16-byte localizer id |
//! | `LOCALIZE` | 16-byte localizer id, then localizer-specific settings |
//! | `LOCALIZEDONE` | bool success |
//! | `COORDSTATE` | u8 tracking state, bool located, bool locating, Vec3, Quat |
//! | `LOCDATA` | session-defined opaque bytes |

use align_core::{AlignError, AlignResult, LocalizerId, Quat, TrackingState, Vec3};

use crate::{write_command_header, MessageReader, MessageWriter};
use crate::{
    COMMAND_COORDINATE_STATE, COMMAND_LOCALIZE, COMMAND_LOCALIZE_DONE,
    COMMAND_SUPPORTED_LOCALIZERS,
};

/// State snapshot a device broadcasts about itself.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct CoordinateStateMessage {
    /// Tracking status of the sending device
    pub tracking_state: TrackingState,
    /// Whether the sender's shared coordinate is in a located state
    pub coordinate_located: bool,
    /// Whether the sender is actively running a localization session
    pub is_locating: bool,
    /// Shared coordinate origin in the sender's world space
    pub position: Vec3,
    /// Shared coordinate orientation in the sender's world space
    pub rotation: Quat,
}

impl CoordinateStateMessage {
    /// Serialize as a complete message including the command header.
    pub fn encode(&self) -> AlignResult<Vec<u8>> {
        let mut writer = MessageWriter::new();
        write_command_header(&mut writer, COMMAND_COORDINATE_STATE)?;
        writer.write_u8(self.tracking_state.to_byte());
        writer.write_bool(self.coordinate_located);
        writer.write_bool(self.is_locating);
        writer.write_vec3(self.position);
        writer.write_quat(self.rotation);
        Ok(writer.into_bytes())
    }

    /// Decode the payload; the command header has already been consumed.
    pub fn decode(reader: &mut MessageReader<'_>) -> AlignResult<Self> {
        Ok(CoordinateStateMessage {
            tracking_state: reader.read_tracking_state()?,
            coordinate_located: reader.read_bool()?,
            is_locating: reader.read_bool()?,
            position: reader.read_vec3()?,
            rotation: reader.read_quat()?,
        })
    }
}

/// The localizer ids a device has registered, sent once on connect.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct SupportedLocalizersMessage {
    pub localizer_ids: Vec<LocalizerId>,
}

impl SupportedLocalizersMessage {
    pub fn encode(&self) -> AlignResult<Vec<u8>> {
        let mut writer = MessageWriter::new();
        write_command_header(&mut writer, COMMAND_SUPPORTED_LOCALIZERS)?;
        writer.write_i32(self.localizer_ids.len() as i32);
        for id in &self.localizer_ids {
            writer.write_localizer_id(*id);
        }
        Ok(writer.into_bytes())
    }

    pub fn decode(reader: &mut MessageReader<'_>) -> AlignResult<Self> {
        let count = reader.read_i32()?;
        if count < 0 {
            return Err(AlignError::InvalidWireFormat(format!(
                "negative localizer count: {count}"
            )));
        }
        let mut localizer_ids = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            localizer_ids.push(reader.read_localizer_id()?);
        }
        Ok(SupportedLocalizersMessage { localizer_ids })
    }
}

/// Request that the receiving device run a localization session.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalizeMessage {
    pub localizer_id: LocalizerId,
    /// Localizer-specific settings, serialized by the requesting side's
    /// localizer and deserialized by the receiving side's. Opaque here.
    pub settings: Vec<u8>,
}

impl LocalizeMessage {
    pub fn encode(&self) -> AlignResult<Vec<u8>> {
        let mut writer = MessageWriter::new();
        write_command_header(&mut writer, COMMAND_LOCALIZE)?;
        writer.write_localizer_id(self.localizer_id);
        writer.write_bytes(&self.settings);
        Ok(writer.into_bytes())
    }

    pub fn decode(reader: &mut MessageReader<'_>) -> AlignResult<Self> {
        let localizer_id = reader.read_localizer_id()?;
        let settings = reader.read_to_end().to_vec();
        Ok(LocalizeMessage {
            localizer_id,
            settings,
        })
    }
}

/// Completion reply for a `LOCALIZE` request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalizeDoneMessage {
    pub succeeded: bool,
}

impl LocalizeDoneMessage {
    pub fn encode(&self) -> AlignResult<Vec<u8>> {
        let mut writer = MessageWriter::new();
        write_command_header(&mut writer, COMMAND_LOCALIZE_DONE)?;
        writer.write_bool(self.succeeded);
        Ok(writer.into_bytes())
    }

    pub fn decode(reader: &mut MessageReader<'_>) -> AlignResult<Self> {
        Ok(LocalizeDoneMessage {
            succeeded: reader.read_bool()?,
        })
    }
}
