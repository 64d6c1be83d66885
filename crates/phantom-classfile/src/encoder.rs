//! Class file encoding and decoding utilities
//!
//! Primitive big-endian readers and writers shared by the constant pool, the
//! class structure and the instruction codec. Strings in class files use the
//! JVM's modified UTF-8, handled by [`decode_modified_utf8`] and
//! [`encode_modified_utf8`].

use thiserror::Error;

/// Errors that can occur while decoding class file bytes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of the byte stream
    #[error("Unexpected end of class data at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid modified UTF-8 string
    #[error("Invalid modified UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Unknown constant pool tag
    #[error("Invalid constant pool tag {0} at offset {1}")]
    InvalidConstantTag(u8, usize),
}

/// Big-endian writer for class file structures
pub struct BytecodeWriter {
    /// Internal buffer containing the encoded bytes
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current offset (length of the buffer)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a signed byte
    pub fn emit_i8(&mut self, value: i8) {
        self.buffer.push(value as u8);
    }

    /// Emit a 16-bit unsigned integer (big-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a 16-bit signed integer (big-endian)
    pub fn emit_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a 32-bit unsigned integer (big-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a 32-bit signed integer (big-endian)
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a 64-bit signed integer (big-endian)
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a u16 length followed by the modified UTF-8 form of `value`
    pub fn emit_utf8(&mut self, value: &str) {
        let encoded = encode_modified_utf8(value);
        self.emit_u16(encoded.len() as u16);
        self.buffer.extend_from_slice(&encoded);
    }

    // ===== Back-patching =====

    /// Reserve space for a u32 and return its offset
    pub fn reserve_u32(&mut self) -> usize {
        let offset = self.buffer.len();
        self.emit_u32(0);
        offset
    }

    /// Patch a previously reserved u32
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Patch a u16 at an earlier offset
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        self.buffer[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// Patch an i32 at an earlier offset
    pub fn patch_i32(&mut self, offset: usize, value: i32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Write a length-prefixed block: a u32 length followed by what `body` emits
    pub fn emit_length_prefixed(&mut self, body: impl FnOnce(&mut BytecodeWriter)) {
        let at = self.reserve_u32();
        let start = self.offset();
        body(self);
        let len = (self.offset() - start) as u32;
        self.patch_u32(at, len);
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Big-endian reader over class file bytes
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Get the current position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get the number of unread bytes
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Jump to a position
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// Check whether unread bytes remain
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if self.position + count > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let slice = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    /// Read a byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a signed byte
    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.take(1)?[0] as i8)
    }

    /// Read a 16-bit unsigned integer (big-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a 16-bit signed integer (big-endian)
    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a 32-bit unsigned integer (big-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a 32-bit signed integer (big-endian)
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a 64-bit signed integer (big-endian)
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let b = self.take(8)?;
        Ok(i64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(self.take(count)?.to_vec())
    }

    /// Borrow a fixed number of bytes without copying
    pub fn read_slice(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        self.take(count)
    }

    /// Read a u16-length-prefixed modified UTF-8 string
    pub fn read_utf8(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let start = self.position;
        let bytes = self.take(len)?;
        decode_modified_utf8(bytes).ok_or(DecodeError::InvalidUtf8(start))
    }
}

/// Decode the JVM's modified UTF-8 into a Rust string.
///
/// Returns `None` for malformed sequences or unpaired surrogates.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    // Fast path: plain ASCII without NUL is identical in both encodings.
    if bytes.iter().all(|&b| b != 0 && b < 0x80) {
        return std::str::from_utf8(bytes).ok().map(str::to_owned);
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let a = bytes[i] as u16;
        if a & 0x80 == 0 {
            if a == 0 {
                return None;
            }
            units.push(a);
            i += 1;
        } else if a & 0xE0 == 0xC0 {
            let b = *bytes.get(i + 1)? as u16;
            if b & 0xC0 != 0x80 {
                return None;
            }
            units.push(((a & 0x1F) << 6) | (b & 0x3F));
            i += 2;
        } else if a & 0xF0 == 0xE0 {
            let b = *bytes.get(i + 1)? as u16;
            let c = *bytes.get(i + 2)? as u16;
            if b & 0xC0 != 0x80 || c & 0xC0 != 0x80 {
                return None;
            }
            units.push(((a & 0x0F) << 12) | ((b & 0x3F) << 6) | (c & 0x3F));
            i += 3;
        } else {
            return None;
        }
    }
    String::from_utf16(&units).ok()
}

/// Encode a Rust string as the JVM's modified UTF-8.
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    if value.bytes().all(|b| b != 0 && b < 0x80) {
        return value.as_bytes().to_vec();
    }

    let mut out = Vec::with_capacity(value.len() + 8);
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push((0xC0 | ((unit >> 6) & 0x1F)) as u8);
                out.push((0x80 | (unit & 0x3F)) as u8);
            }
            _ => {
                out.push((0xE0 | ((unit >> 12) & 0x0F)) as u8);
                out.push((0x80 | ((unit >> 6) & 0x3F)) as u8);
                out.push((0x80 | (unit & 0x3F)) as u8);
            }
        }
    }
    out
}
