//! Message writer - little-endian primitive encoding
//!
//! Encoding rules (wire version 0):
//! - Integers and floats: little-endian
//! - bool: one byte, 0 or 1
//! - String: u16 LE byte length + UTF-8 bytes
//! - LocalizerId: 16 bytes LE
//! - Vec3: 3 x f32, Quat: 4 x f32 (x, y, z, w)

use bytes::{BufMut, BytesMut};

use align_core::{AlignError, AlignResult, LocalizerId, Quat, Vec3};

/// Builder for one outgoing message buffer.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    pub fn new() -> Self {
        MessageWriter {
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn write_localizer_id(&mut self, id: LocalizerId) {
        self.buf.put_slice(&id.to_bytes());
    }

    /// u16 length prefix + UTF-8 bytes. Strings longer than u16::MAX bytes
    /// are a caller bug and rejected.
    pub fn write_string(&mut self, value: &str) -> AlignResult<()> {
        let bytes = value.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(AlignError::InvalidWireFormat(format!(
                "string too long for wire: {} bytes",
                bytes.len()
            )));
        }
        self.buf.put_u16_le(bytes.len() as u16);
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Raw bytes, no length prefix. Callers that need framing write their
    /// own length first.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    pub fn write_quat(&mut self, value: Quat) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
        self.write_f32(value.w);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_primitives() {
        let mut writer = MessageWriter::new();
        writer.write_u8(0xAB);
        writer.write_bool(true);
        writer.write_i32(-5);
        writer.write_f32(1.5);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 1 + 1 + 4 + 4);
        assert_eq!(bytes[0], 0xAB);
        assert_eq!(bytes[1], 1);
    }

    #[test]
    fn test_write_string_length_prefix() {
        let mut writer = MessageWriter::new();
        writer.write_string("abc").unwrap();
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..2], &3u16.to_le_bytes());
        assert_eq!(&bytes[2..], b"abc");
    }
}
