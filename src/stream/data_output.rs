//! Growable binary output buffer.

use crate::error::Result;
use bytes::{BufMut, BytesMut};

/// Trait for writing primitive values in the marshaller's binary format.
///
/// All multi-byte values are written in little-endian byte order. `char`
/// is written as its 32-bit scalar value.
pub trait DataOutput {
    /// Writes a single byte (i8).
    fn write_byte(&mut self, v: i8) -> Result<()>;

    /// Writes a boolean as a single byte (0 for false, 1 for true).
    fn write_bool(&mut self, v: bool) -> Result<()>;

    /// Writes a 16-bit signed integer.
    fn write_short(&mut self, v: i16) -> Result<()>;

    /// Writes a 32-bit signed integer.
    fn write_int(&mut self, v: i32) -> Result<()>;

    /// Writes a 64-bit signed integer.
    fn write_long(&mut self, v: i64) -> Result<()>;

    /// Writes a 32-bit floating point.
    fn write_float(&mut self, v: f32) -> Result<()>;

    /// Writes a 64-bit floating point.
    fn write_double(&mut self, v: f64) -> Result<()>;

    /// Writes a char as its 32-bit scalar value.
    fn write_char(&mut self, v: char) -> Result<()>;

    /// Writes raw bytes without a length prefix.
    fn write_bytes(&mut self, v: &[u8]) -> Result<()>;

    /// Writes a string as a 32-bit byte length followed by UTF-8 bytes.
    fn write_string(&mut self, v: &str) -> Result<()>;
}

/// A buffer-based implementation of [`DataOutput`].
///
/// The buffer only grows during a marshalling call; the stream registry
/// retains it between uses and shrinks it past the soft cap.
#[derive(Debug)]
pub struct ByteDataOutput {
    buf: BytesMut,
}

impl ByteDataOutput {
    /// Creates an output buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> ByteDataOutput {
        ByteDataOutput {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Current write position (equals the number of bytes written).
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Returns the written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the buffer's capacity.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Clears the buffer, keeping its capacity.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Writes a raw u8.
    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.buf.put_u8(v);
        Ok(())
    }

    /// Writes a raw little-endian u16.
    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.buf.put_u16_le(v);
        Ok(())
    }

    /// Writes a raw little-endian u32.
    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.buf.put_u32_le(v);
        Ok(())
    }

    /// Overwrites 4 bytes at `pos` with a little-endian u32. Used to patch
    /// length words once a variable-size body is complete.
    pub fn patch_u32(&mut self, pos: usize, v: u32) {
        self.buf[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
    }
}

impl Default for ByteDataOutput {
    fn default() -> Self {
        Self::with_capacity(256)
    }
}

impl DataOutput for ByteDataOutput {
    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.buf.put_i8(v);
        Ok(())
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.buf.put_u8(u8::from(v));
        Ok(())
    }

    fn write_short(&mut self, v: i16) -> Result<()> {
        self.buf.put_i16_le(v);
        Ok(())
    }

    fn write_int(&mut self, v: i32) -> Result<()> {
        self.buf.put_i32_le(v);
        Ok(())
    }

    fn write_long(&mut self, v: i64) -> Result<()> {
        self.buf.put_i64_le(v);
        Ok(())
    }

    fn write_float(&mut self, v: f32) -> Result<()> {
        self.buf.put_f32_le(v);
        Ok(())
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.buf.put_f64_le(v);
        Ok(())
    }

    fn write_char(&mut self, v: char) -> Result<()> {
        self.buf.put_u32_le(v as u32);
        Ok(())
    }

    fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        self.buf.put_slice(v);
        Ok(())
    }

    fn write_string(&mut self, v: &str) -> Result<()> {
        let bytes = v.as_bytes();
        self.write_int(bytes.len() as i32)?;
        self.write_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_output_is_empty() {
        let out = ByteDataOutput::default();
        assert_eq!(out.position(), 0);
        assert!(out.as_bytes().is_empty());
    }

    #[test]
    fn test_write_int_little_endian() {
        let mut out = ByteDataOutput::default();
        out.write_int(0x01020304).unwrap();
        assert_eq!(out.as_bytes(), &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_write_long_little_endian() {
        let mut out = ByteDataOutput::default();
        out.write_long(0x0102030405060708).unwrap();
        assert_eq!(
            out.as_bytes(),
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_write_byte_negative() {
        let mut out = ByteDataOutput::default();
        out.write_byte(-1).unwrap();
        assert_eq!(out.as_bytes(), &[0xFF]);
    }

    #[test]
    fn test_write_bool() {
        let mut out = ByteDataOutput::default();
        out.write_bool(true).unwrap();
        out.write_bool(false).unwrap();
        assert_eq!(out.as_bytes(), &[1, 0]);
    }

    #[test]
    fn test_write_string_length_prefixed() {
        let mut out = ByteDataOutput::default();
        out.write_string("abc").unwrap();
        assert_eq!(out.as_bytes(), &[3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_write_empty_string() {
        let mut out = ByteDataOutput::default();
        out.write_string("").unwrap();
        assert_eq!(out.as_bytes(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_write_char_scalar() {
        let mut out = ByteDataOutput::default();
        out.write_char('A').unwrap();
        assert_eq!(out.as_bytes(), &[0x41, 0, 0, 0]);
    }

    #[test]
    fn test_patch_u32() {
        let mut out = ByteDataOutput::default();
        out.write_u32(0).unwrap();
        out.write_u8(9).unwrap();
        out.patch_u32(0, 0xAABBCCDD);
        assert_eq!(out.as_bytes(), &[0xDD, 0xCC, 0xBB, 0xAA, 9]);
    }

    #[test]
    fn test_position_tracks_writes() {
        let mut out = ByteDataOutput::default();
        out.write_int(1).unwrap();
        assert_eq!(out.position(), 4);
        out.write_double(1.0).unwrap();
        assert_eq!(out.position(), 12);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut out = ByteDataOutput::with_capacity(64);
        out.write_long(7).unwrap();
        out.clear();
        assert_eq!(out.position(), 0);
        assert!(out.capacity() >= 64);
    }
}
