//! Command envelope
//!
//! Every logical message is one transport send shaped as:
//! `[string command header][command-specific payload]`.
//! The header identifies the message type; exactly one handler may be
//! registered per header.

use align_core::AlignResult;

use crate::{MessageReader, MessageWriter};

/// Sent on connect: the set of localizer ids this device supports.
pub const COMMAND_SUPPORTED_LOCALIZERS: &str = "SUPPORTLOC";

/// Per-tick (on change): local tracking/coordinate state snapshot.
pub const COMMAND_COORDINATE_STATE: &str = "COORDSTATE";

/// Ask the peer to run a localizer with the attached settings.
pub const COMMAND_LOCALIZE: &str = "LOCALIZE";

/// Reply to `LOCALIZE` once the session finished, carrying success.
pub const COMMAND_LOCALIZE_DONE: &str = "LOCALIZEDONE";

/// Opaque in-session data exchange between the two halves of one
/// localization session.
pub const COMMAND_LOCALIZATION_DATA: &str = "LOCDATA";

/// Start a message buffer with its command header.
pub fn write_command_header(writer: &mut MessageWriter, command: &str) -> AlignResult<()> {
    writer.write_string(command)
}

/// Read the command header off the front of a received message. The reader
/// is left positioned at the start of the payload.
pub fn read_command_header(reader: &mut MessageReader<'_>) -> AlignResult<String> {
    reader.read_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_header_roundtrip() {
        let mut writer = MessageWriter::new();
        write_command_header(&mut writer, COMMAND_LOCALIZE).unwrap();
        writer.write_bool(true);
        let bytes = writer.into_bytes();

        let mut reader = MessageReader::new(&bytes);
        assert_eq!(read_command_header(&mut reader).unwrap(), COMMAND_LOCALIZE);
        assert_eq!(reader.remaining(), 1);
    }
}
