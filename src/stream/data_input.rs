//! Positioned binary input cursor.

use crate::error::{MarshalError, Result};
use bytes::Buf;
use std::io::Cursor;

/// Trait for reading primitive values from the marshaller's binary format.
///
/// All multi-byte values are read in little-endian byte order.
pub trait DataInput {
    /// Reads a single byte (i8).
    fn read_byte(&mut self) -> Result<i8>;

    /// Reads a boolean from a single byte.
    fn read_bool(&mut self) -> Result<bool>;

    /// Reads a 16-bit signed integer.
    fn read_short(&mut self) -> Result<i16>;

    /// Reads a 32-bit signed integer.
    fn read_int(&mut self) -> Result<i32>;

    /// Reads a 64-bit signed integer.
    fn read_long(&mut self) -> Result<i64>;

    /// Reads a 32-bit floating point.
    fn read_float(&mut self) -> Result<f32>;

    /// Reads a 64-bit floating point.
    fn read_double(&mut self) -> Result<f64>;

    /// Reads a char from its 32-bit scalar value.
    fn read_char(&mut self) -> Result<char>;

    /// Reads the specified number of raw bytes.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Reads a length-prefixed UTF-8 string.
    fn read_string(&mut self) -> Result<String>;
}

/// A bounds-checked cursor over a byte slice, with absolute seeks for
/// footer jumps.
#[derive(Debug)]
pub struct ByteDataInput<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteDataInput<'a> {
    /// Creates a cursor over the given bytes.
    pub fn new(data: &'a [u8]) -> ByteDataInput<'a> {
        ByteDataInput {
            cursor: Cursor::new(data),
        }
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    /// Moves the read position to an absolute offset.
    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.len() {
            return Err(MarshalError::Protocol(format!(
                "seek past end of input: {} > {}",
                pos,
                self.len()
            )));
        }
        self.cursor.set_position(pos as u64);
        Ok(())
    }

    /// Number of bytes remaining to read.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Total input length.
    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    /// Returns `true` if the input is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Skips `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure_remaining(n)?;
        self.cursor.advance(n);
        Ok(())
    }

    /// Reads a raw u8.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_remaining(1)?;
        Ok(self.cursor.get_u8())
    }

    /// Reads a raw little-endian u16.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure_remaining(2)?;
        Ok(self.cursor.get_u16_le())
    }

    /// Reads a raw little-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure_remaining(4)?;
        Ok(self.cursor.get_u32_le())
    }

    fn ensure_remaining(&self, n: usize) -> Result<()> {
        if self.cursor.remaining() < n {
            Err(MarshalError::Protocol(format!(
                "truncated input: need {} bytes, have {}",
                n,
                self.cursor.remaining()
            )))
        } else {
            Ok(())
        }
    }
}

impl DataInput for ByteDataInput<'_> {
    fn read_byte(&mut self) -> Result<i8> {
        self.ensure_remaining(1)?;
        Ok(self.cursor.get_i8())
    }

    fn read_bool(&mut self) -> Result<bool> {
        self.ensure_remaining(1)?;
        Ok(self.cursor.get_u8() != 0)
    }

    fn read_short(&mut self) -> Result<i16> {
        self.ensure_remaining(2)?;
        Ok(self.cursor.get_i16_le())
    }

    fn read_int(&mut self) -> Result<i32> {
        self.ensure_remaining(4)?;
        Ok(self.cursor.get_i32_le())
    }

    fn read_long(&mut self) -> Result<i64> {
        self.ensure_remaining(8)?;
        Ok(self.cursor.get_i64_le())
    }

    fn read_float(&mut self) -> Result<f32> {
        self.ensure_remaining(4)?;
        Ok(self.cursor.get_f32_le())
    }

    fn read_double(&mut self) -> Result<f64> {
        self.ensure_remaining(8)?;
        Ok(self.cursor.get_f64_le())
    }

    fn read_char(&mut self) -> Result<char> {
        let raw = self.read_u32()?;
        char::from_u32(raw)
            .ok_or_else(|| MarshalError::Protocol(format!("invalid char scalar: {:#x}", raw)))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure_remaining(len)?;
        let mut buf = vec![0u8; len];
        self.cursor.copy_to_slice(&mut buf);
        Ok(buf)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_int()?;
        if len < 0 {
            return Err(MarshalError::Protocol(format!(
                "invalid string length: {}",
                len
            )));
        }
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes)
            .map_err(|e| MarshalError::Protocol(format!("invalid UTF-8 string: {}", e)))
    }
}
