//! Primitive field encoding shared by every packet.
//!
//! All integers are big-endian and fixed-width, booleans take one byte and
//! strings are UTF-8 behind a `u32` length prefix. Optional strings are a
//! presence boolean followed by the string when present; UUIDs are their 16
//! raw bytes.

use crate::error::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Write side of the codec.
///
/// Methods chain so a packet's `write` reads in field order:
///
/// ```rust
/// use fleet_protocol::NetworkBuf;
///
/// let mut buf = NetworkBuf::new();
/// buf.write_string("lobby").write_i32(512).write_bool(true);
/// assert_eq!(buf.len(), 4 + 5 + 4 + 1);
/// ```
#[derive(Debug, Default)]
pub struct NetworkBuf {
    inner: BytesMut,
}

impl NetworkBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.inner.put_u8(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.inner.put_u16(value);
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.inner.put_i32(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.inner.put_u8(u8::from(value));
        self
    }

    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.inner.put_u32(value.len() as u32);
        self.inner.put_slice(value.as_bytes());
        self
    }

    pub fn write_optional_string(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(value) => self.write_bool(true).write_string(value),
            None => self.write_bool(false),
        }
    }

    pub fn write_uuid(&mut self, value: &Uuid) -> &mut Self {
        self.inner.put_slice(value.as_bytes());
        self
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Freezes the written bytes into an immutable, cheaply clonable payload.
    pub fn freeze(self) -> Bytes {
        self.inner.freeze()
    }
}

/// Read side of the codec.
///
/// Every read checks the remaining length first, so a truncated payload is
/// reported as [`CodecError::UnexpectedEof`] instead of panicking.
#[derive(Debug, Clone)]
pub struct NetworkReader {
    inner: Bytes,
}

impl NetworkReader {
    pub fn new(payload: Bytes) -> Self {
        Self { inner: payload }
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        let remaining = self.inner.remaining();
        if remaining < needed {
            return Err(CodecError::UnexpectedEof { needed, remaining });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.inner.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.ensure(2)?;
        Ok(self.inner.get_u16())
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.inner.get_i32())
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        self.ensure(4)?;
        let len = self.inner.get_u32() as usize;
        self.ensure(len)?;
        let raw = self.inner.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_optional_string(&mut self) -> Result<Option<String>, CodecError> {
        if self.read_bool()? {
            self.read_string().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, CodecError> {
        self.ensure(16)?;
        let mut raw = [0u8; 16];
        self.inner.copy_to_slice(&mut raw);
        Ok(Uuid::from_bytes(raw))
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining()
    }

    /// Fails if any byte was left unread.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.inner.remaining() {
            0 => Ok(()),
            left => Err(CodecError::TrailingBytes(left)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_read_back_in_write_order() {
        let id = Uuid::new_v4();
        let mut buf = NetworkBuf::new();
        buf.write_string("bedwars")
            .write_i32(-7)
            .write_bool(true)
            .write_u16(0x2a2a)
            .write_optional_string(None)
            .write_optional_string(Some("proxy-1"))
            .write_uuid(&id);

        let mut reader = NetworkReader::new(buf.freeze());
        assert_eq!(reader.read_string().unwrap(), "bedwars");
        assert_eq!(reader.read_i32().unwrap(), -7);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_u16().unwrap(), 0x2a2a);
        assert_eq!(reader.read_optional_string().unwrap(), None);
        assert_eq!(reader.read_optional_string().unwrap().as_deref(), Some("proxy-1"));
        assert_eq!(reader.read_uuid().unwrap(), id);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn integers_are_big_endian() {
        let mut buf = NetworkBuf::new();
        buf.write_i32(1).write_string("a");
        assert_eq!(&buf.freeze()[..], &[0, 0, 0, 1, 0, 0, 0, 1, b'a']);
    }

    #[test]
    fn multibyte_strings_prefix_byte_length() {
        let mut buf = NetworkBuf::new();
        buf.write_string("größe");
        let bytes = buf.freeze();
        assert_eq!(&bytes[..4], &[0, 0, 0, 7]);
        assert_eq!(NetworkReader::new(bytes).read_string().unwrap(), "größe");
    }

    #[test]
    fn truncated_string_is_reported() {
        let mut buf = NetworkBuf::new();
        buf.write_string("template");
        let bytes = buf.freeze().slice(..6);

        let err = NetworkReader::new(bytes).read_string().unwrap_err();
        assert_eq!(err, CodecError::UnexpectedEof { needed: 8, remaining: 2 });
    }

    #[test]
    fn rejects_non_boolean_byte() {
        let mut reader = NetworkReader::new(Bytes::from_static(&[2]));
        assert_eq!(reader.read_bool().unwrap_err(), CodecError::InvalidBool(2));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut reader = NetworkReader::new(Bytes::from_static(&[0, 0, 0, 2, 0xff, 0xfe]));
        assert_eq!(reader.read_string().unwrap_err(), CodecError::InvalidUtf8);
    }

    #[test]
    fn finish_reports_trailing_bytes() {
        let reader = NetworkReader::new(Bytes::from_static(&[1, 2, 3]));
        assert_eq!(reader.finish().unwrap_err(), CodecError::TrailingBytes(3));
    }
}
