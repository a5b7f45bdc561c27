//! Sequential little-endian byte buffers.
//!
//! Every multi-byte value on the wire is little-endian. Strings and blobs are
//! prefixed with a `u16` length and readers check that length against a
//! caller-supplied limit before touching the payload.

use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Largest length a `u16` prefix can describe.
pub const MAX_PREFIXED_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("unexpected end of buffer")]
    UnexpectedEof,
    #[error("length {len} exceeds limit {max}")]
    LengthExceeded { len: usize, max: usize },
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("value {0} does not fit its wire field")]
    Overflow(usize),
}

impl From<io::Error> for BufferError {
    fn from(_: io::Error) -> Self {
        // Writes go to a Vec and reads come from a slice, so running out of
        // input is the only failure either side can report.
        BufferError::UnexpectedEof
    }
}

#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), BufferError> {
        self.buf.write_u8(value)?;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), BufferError> {
        self.write_u8(value as u8)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), BufferError> {
        self.buf.write_u16::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), BufferError> {
        self.buf.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), BufferError> {
        self.buf.write_u64::<LittleEndian>(value)?;
        Ok(())
    }

    /// Writes a `u16` length that must fit the field.
    pub fn write_len(&mut self, len: usize) -> Result<(), BufferError> {
        let len = u16::try_from(len).map_err(|_| BufferError::Overflow(len))?;
        self.write_u16(len)
    }

    pub fn write_str(&mut self, value: &str) -> Result<(), BufferError> {
        self.write_blob(value.as_bytes())
    }

    pub fn write_blob(&mut self, value: &[u8]) -> Result<(), BufferError> {
        self.write_len(value.len())?;
        self.buf.extend_from_slice(value);
        Ok(())
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounded reader over a borrowed slice. Strings and blobs borrow from the
/// input instead of allocating.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        let value = self.remaining_slice().read_u8()?;
        self.position += 1;
        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool, BufferError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        let value = self.remaining_slice().read_u16::<LittleEndian>()?;
        self.position += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        let value = self.remaining_slice().read_u32::<LittleEndian>()?;
        self.position += 4;
        Ok(value)
    }

    pub fn read_u64(&mut self) -> Result<u64, BufferError> {
        let value = self.remaining_slice().read_u64::<LittleEndian>()?;
        self.position += 8;
        Ok(value)
    }

    /// Reads a `u16` length prefix and rejects it when it is above `max`.
    pub fn read_len(&mut self, max: usize) -> Result<usize, BufferError> {
        let len = self.read_u16()? as usize;
        if len > max {
            return Err(BufferError::LengthExceeded { len, max });
        }
        Ok(len)
    }

    pub fn read_str(&mut self, max: usize) -> Result<&'a str, BufferError> {
        let bytes = self.read_blob(max)?;
        std::str::from_utf8(bytes).map_err(|_| BufferError::InvalidUtf8)
    }

    pub fn read_blob(&mut self, max: usize) -> Result<&'a [u8], BufferError> {
        let len = self.read_len(max)?;
        self.read_bytes(len)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], BufferError> {
        let rest = self.remaining_slice();
        if rest.len() < len {
            return Err(BufferError::UnexpectedEof);
        }
        self.position += len;
        Ok(&rest[..len])
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn remaining_slice(&self) -> &'a [u8] {
        &self.data[self.position..]
    }
}
