//! Message reader - little-endian primitive decoding
//!
//! Mirror of [`crate::MessageWriter`]. Every read is bounds-checked and
//! returns a wire error instead of panicking; a malformed peer message must
//! never take down the receive loop.

use align_core::{AlignError, AlignResult, LocalizerId, Quat, TrackingState, Vec3};

/// Cursor over one received message buffer.
#[derive(Debug)]
pub struct MessageReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        MessageReader { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, count: usize) -> AlignResult<&'a [u8]> {
        if self.remaining() < count {
            return Err(AlignError::BufferTooShort {
                expected: count,
                actual: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> AlignResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> AlignResult<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    pub fn read_u16(&mut self) -> AlignResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i32(&mut self) -> AlignResult<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u32(&mut self) -> AlignResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> AlignResult<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_f32(&mut self) -> AlignResult<f32> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_localizer_id(&mut self) -> AlignResult<LocalizerId> {
        let bytes = self.take(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(LocalizerId::from_bytes(raw))
    }

    pub fn read_string(&mut self) -> AlignResult<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| AlignError::InvalidWireFormat("string is not valid UTF-8".into()))
    }

    pub fn read_vec3(&mut self) -> AlignResult<Vec3> {
        Ok(Vec3::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    pub fn read_quat(&mut self) -> AlignResult<Quat> {
        Ok(Quat::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    pub fn read_tracking_state(&mut self) -> AlignResult<TrackingState> {
        Ok(TrackingState::from_byte(self.read_u8()?))
    }

    /// Consume and return everything left in the buffer.
    pub fn read_to_end(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageWriter;

    #[test]
    fn test_reader_roundtrip() {
        let mut writer = MessageWriter::new();
        writer.write_u8(7);
        writer.write_bool(false);
        writer.write_i32(-42);
        writer.write_f32(3.25);
        writer.write_string("hello").unwrap();
        writer.write_localizer_id(LocalizerId::new(99));
        let bytes = writer.into_bytes();

        let mut reader = MessageReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert!(!reader.read_bool().unwrap());
        assert_eq!(reader.read_i32().unwrap(), -42);
        assert_eq!(reader.read_f32().unwrap(), 3.25);
        assert_eq!(reader.read_string().unwrap(), "hello");
        assert_eq!(reader.read_localizer_id().unwrap(), LocalizerId::new(99));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_short_buffer_is_error() {
        let mut reader = MessageReader::new(&[0x01]);
        assert!(reader.read_i32().is_err());
    }

    #[test]
    fn test_truncated_string_is_error() {
        let mut writer = MessageWriter::new();
        writer.write_u16(10);
        writer.write_bytes(b"abc");
        let bytes = writer.into_bytes();
        let mut reader = MessageReader::new(&bytes);
        assert!(reader.read_string().is_err());
    }

    #[test]
    fn test_invalid_utf8_is_error() {
        let mut writer = MessageWriter::new();
        writer.write_u16(2);
        writer.write_bytes(&[0xFF, 0xFE]);
        let bytes = writer.into_bytes();
        let mut reader = MessageReader::new(&bytes);
        assert!(reader.read_string().is_err());
    }
}
