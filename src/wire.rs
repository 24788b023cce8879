//! Byte-level cursor over the RFC 1035 wire format
//!
//! All integers are big-endian. Names are sequences of length-prefixed
//! labels closed by a zero-length label; the root name is a single zero
//! octet. Compression pointers are not interpreted on either path.

use thiserror::Error;

/// Labels are limited to 63 octets, character strings to 255.
pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_STRING_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("unexpected end of message at offset {0}")]
    UnexpectedEof(usize),
    #[error("'{0}' is too long for a {1}-octet field")]
    StringTooLong(String, usize),
    #[error("malformed {0} payload of {1} octets")]
    BadPayload(&'static str, usize),
}

/// Growable, seekable cursor. Writes past the end extend the buffer;
/// writes behind the current end overwrite in place, which is what the
/// two-pass RDATA length patch relies on.
pub struct WireCursor {
    buf: Vec<u8>,
    pos: usize,
}

impl WireCursor {
    pub fn new() -> WireCursor {
        WireCursor { buf: Vec::new(), pos: 0 }
    }

    pub fn with_capacity(capacity: usize) -> WireCursor {
        WireCursor { buf: Vec::with_capacity(capacity), pos: 0 }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> WireCursor {
        WireCursor { buf: bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn put(&mut self, byte: u8) {
        if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
        } else {
            self.buf.push(byte);
        }
        self.pos += 1;
    }

    pub fn write_u8(&mut self, value: u8) {
        self.put(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.put((value >> 8) as u8);
        self.put((value & 0x00ff) as u8);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.put((value >> 24) as u8);
        self.put((value >> 16) as u8);
        self.put((value >> 8) as u8);
        self.put(value as u8);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.put(b);
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let b = *self.buf.get(self.pos).ok_or(WireError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(((self.read_u8()? as u16) << 8) | self.read_u8()? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(((self.read_u16()? as u32) << 16) | self.read_u16()? as u32)
    }

    pub fn read_exact(&mut self, count: usize) -> Result<&[u8], WireError> {
        if self.pos + count > self.buf.len() {
            return Err(WireError::UnexpectedEof(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Reads length-prefixed labels up to the zero terminator and joins
    /// them with '.'. An empty name decodes to ".".
    pub fn read_name(&mut self) -> Result<String, WireError> {
        let mut name = String::new();
        loop {
            let length = self.read_u8()? as usize;
            if length == 0 {
                break;
            }
            let bytes = self.read_exact(length)?;
            if !name.is_empty() {
                name.push('.');
            }
            name.push_str(&String::from_utf8_lossy(bytes));
        }
        if name.is_empty() {
            name.push('.');
        }
        Ok(name)
    }

    /// Writes a fully-qualified name. A trailing dot is tolerated and
    /// stripped; the root name is a single zero octet.
    pub fn write_name(&mut self, name: &str) -> Result<(), WireError> {
        let name = name.trim_end_matches('.');
        if name.is_empty() {
            self.put(0);
            return Ok(());
        }
        for label in name.split('.') {
            self.write_prefixed_string(label, MAX_LABEL_LEN)?;
        }
        self.put(0);
        Ok(())
    }

    pub fn read_prefixed_string(&mut self) -> Result<String, WireError> {
        let length = self.read_u8()? as usize;
        let bytes = self.read_exact(length)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn write_prefixed_string(&mut self, value: &str, max_length: usize) -> Result<(), WireError> {
        if value.len() > max_length {
            return Err(WireError::StringTooLong(value.to_string(), max_length));
        }
        self.put(value.len() as u8);
        self.write_bytes(value.as_bytes());
        Ok(())
    }
}

impl Default for WireCursor {
    fn default() -> Self {
        WireCursor::new()
    }
}

/// Encoded size of a fully-qualified name: one length octet per label plus
/// the zero terminator, which works out to `len + 2` for non-root names.
pub fn name_len(name: &str) -> usize {
    let name = name.trim_end_matches('.');
    if name.is_empty() {
        1
    } else {
        name.len() + 2
    }
}
