//! Bounded MessagePack token reader/writer.
//!
//! This is the cursor-style token layer the metadata codec is built on. The reader treats its
//! input as **untrusted**: every length is validated against the remaining bytes before it is
//! used, container headers that declare more elements than could possibly fit are rejected up
//! front, and [`MsgPackReader::skip_value`] walks nested values iteratively so hostile nesting
//! cannot exhaust the stack.

use crate::error::{MetadataError, Result, WireType};

const MARKER_NIL: u8 = 0xc0;
const MARKER_NEVER_USED: u8 = 0xc1;
const MARKER_FALSE: u8 = 0xc2;
const MARKER_TRUE: u8 = 0xc3;
const MARKER_BIN8: u8 = 0xc4;
const MARKER_BIN16: u8 = 0xc5;
const MARKER_BIN32: u8 = 0xc6;
const MARKER_EXT8: u8 = 0xc7;
const MARKER_EXT16: u8 = 0xc8;
const MARKER_EXT32: u8 = 0xc9;
const MARKER_FLOAT32: u8 = 0xca;
const MARKER_FLOAT64: u8 = 0xcb;
const MARKER_UINT8: u8 = 0xcc;
const MARKER_UINT16: u8 = 0xcd;
const MARKER_UINT32: u8 = 0xce;
const MARKER_UINT64: u8 = 0xcf;
const MARKER_INT8: u8 = 0xd0;
const MARKER_INT16: u8 = 0xd1;
const MARKER_INT32: u8 = 0xd2;
const MARKER_INT64: u8 = 0xd3;
const MARKER_FIXEXT1: u8 = 0xd4;
const MARKER_FIXEXT2: u8 = 0xd5;
const MARKER_FIXEXT4: u8 = 0xd6;
const MARKER_FIXEXT8: u8 = 0xd7;
const MARKER_FIXEXT16: u8 = 0xd8;
const MARKER_STR8: u8 = 0xd9;
const MARKER_STR16: u8 = 0xda;
const MARKER_STR32: u8 = 0xdb;
const MARKER_ARRAY16: u8 = 0xdc;
const MARKER_ARRAY32: u8 = 0xdd;
const MARKER_MAP16: u8 = 0xde;
const MARKER_MAP32: u8 = 0xdf;

fn wire_type(marker: u8) -> Option<WireType> {
    Some(match marker {
        0x00..=0x7f | 0xe0..=0xff => WireType::Int,
        0x80..=0x8f | MARKER_MAP16 | MARKER_MAP32 => WireType::Map,
        0x90..=0x9f | MARKER_ARRAY16 | MARKER_ARRAY32 => WireType::Array,
        0xa0..=0xbf | MARKER_STR8 | MARKER_STR16 | MARKER_STR32 => WireType::Str,
        MARKER_NIL => WireType::Nil,
        MARKER_FALSE | MARKER_TRUE => WireType::Bool,
        MARKER_BIN8 | MARKER_BIN16 | MARKER_BIN32 => WireType::Bin,
        MARKER_EXT8 | MARKER_EXT16 | MARKER_EXT32 => WireType::Ext,
        MARKER_FIXEXT1..=MARKER_FIXEXT16 => WireType::Ext,
        MARKER_FLOAT32 | MARKER_FLOAT64 => WireType::Float,
        MARKER_UINT8..=MARKER_UINT64 | MARKER_INT8..=MARKER_INT64 => WireType::Int,
        MARKER_NEVER_USED => return None,
    })
}

/// Cursor over a MessagePack buffer.
#[derive(Debug, Clone)]
pub struct MsgPackReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> MsgPackReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Creates a reader positioned at `offset` within `bytes`.
    pub fn at(bytes: &'a [u8], offset: usize) -> Result<Self> {
        let mut reader = Self::new(bytes);
        reader.seek(offset)?;
        Ok(reader)
    }

    /// The whole underlying buffer (not just the unread part).
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.bytes.len() {
            return Err(MetadataError::Truncated {
                offset: pos,
                needed: 0,
                remaining: 0,
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(MetadataError::Truncated {
                offset: self.pos,
                needed: len,
                remaining,
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..start + len])
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_be16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_be32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_be64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn peek_marker(&self) -> Result<u8> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or(MetadataError::Truncated {
                offset: self.pos,
                needed: 1,
                remaining: 0,
            })
    }

    /// Wire type of the next value, without consuming it.
    pub fn peek_type(&self) -> Result<WireType> {
        let marker = self.peek_marker()?;
        wire_type(marker).ok_or_else(|| {
            MetadataError::malformed(self.pos, format!("reserved marker 0x{marker:02x}"))
        })
    }

    fn expect(&self, expected: WireType) -> Result<u8> {
        let found = self.peek_type()?;
        if found != expected {
            return Err(MetadataError::TypeMismatch {
                offset: self.pos,
                expected,
                found,
            });
        }
        self.peek_marker()
    }

    pub fn read_nil(&mut self) -> Result<()> {
        self.expect(WireType::Nil)?;
        self.pos += 1;
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let marker = self.expect(WireType::Bool)?;
        self.pos += 1;
        Ok(marker == MARKER_TRUE)
    }

    /// Reads a non-negative integer of any encoded width.
    ///
    /// Signed encodings are accepted when the value is non-negative, since producers are free to
    /// pick either family for small positive numbers. Negative values are a type mismatch.
    pub fn read_uint(&mut self) -> Result<u64> {
        let start = self.pos;
        let marker = self.expect(WireType::Int)?;
        self.pos += 1;
        let signed = match marker {
            0x00..=0x7f => return Ok(u64::from(marker)),
            MARKER_UINT8 => return Ok(u64::from(self.read_u8()?)),
            MARKER_UINT16 => return Ok(u64::from(self.read_be16()?)),
            MARKER_UINT32 => return Ok(u64::from(self.read_be32()?)),
            MARKER_UINT64 => return self.read_be64(),
            MARKER_INT8 => i64::from(self.read_u8()? as i8),
            MARKER_INT16 => i64::from(self.read_be16()? as i16),
            MARKER_INT32 => i64::from(self.read_be32()? as i32),
            MARKER_INT64 => self.read_be64()? as i64,
            // Negative fixint.
            _ => i64::from(marker as i8),
        };
        u64::try_from(signed).map_err(|_| {
            self.pos = start;
            MetadataError::TypeMismatch {
                offset: start,
                expected: WireType::Int,
                found: WireType::Int,
            }
        })
    }

    /// Reads a non-negative integer that must fit in 32 bits.
    pub fn read_u32(&mut self) -> Result<u32> {
        let start = self.pos;
        let value = self.read_uint()?;
        u32::try_from(value).map_err(|_| {
            self.pos = start;
            MetadataError::TypeMismatch {
                offset: start,
                expected: WireType::Int,
                found: WireType::Int,
            }
        })
    }

    /// Reads the raw bytes of a string value without UTF-8 validation.
    pub fn read_str_bytes(&mut self) -> Result<&'a [u8]> {
        let marker = self.expect(WireType::Str)?;
        self.pos += 1;
        let len = match marker {
            0xa0..=0xbf => usize::from(marker & 0x1f),
            MARKER_STR8 => usize::from(self.read_u8()?),
            MARKER_STR16 => usize::from(self.read_be16()?),
            _ => self.read_be32()? as usize,
        };
        self.take(len)
    }

    pub fn read_str(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let bytes = self.read_str_bytes()?;
        core::str::from_utf8(bytes)
            .map_err(|_| MetadataError::malformed(start, "string is not valid UTF-8"))
    }

    pub fn read_bin(&mut self) -> Result<&'a [u8]> {
        let marker = self.expect(WireType::Bin)?;
        self.pos += 1;
        let len = match marker {
            MARKER_BIN8 => usize::from(self.read_u8()?),
            MARKER_BIN16 => usize::from(self.read_be16()?),
            _ => self.read_be32()? as usize,
        };
        self.take(len)
    }

    pub fn read_array_len(&mut self) -> Result<u32> {
        let marker = self.expect(WireType::Array)?;
        self.pos += 1;
        let len = match marker {
            0x90..=0x9f => u32::from(marker & 0x0f),
            MARKER_ARRAY16 => u32::from(self.read_be16()?),
            _ => self.read_be32()?,
        };
        self.check_elements(len as usize)?;
        Ok(len)
    }

    pub fn read_map_len(&mut self) -> Result<u32> {
        let marker = self.expect(WireType::Map)?;
        self.pos += 1;
        let len = match marker {
            0x80..=0x8f => u32::from(marker & 0x0f),
            MARKER_MAP16 => u32::from(self.read_be16()?),
            _ => self.read_be32()?,
        };
        let elements = (len as usize).checked_mul(2).ok_or(MetadataError::Truncated {
            offset: self.pos,
            needed: usize::MAX,
            remaining: self.remaining(),
        })?;
        self.check_elements(elements)?;
        Ok(len)
    }

    // Every element takes at least one byte, so a header declaring more elements than bytes left
    // can be rejected before anything iterates over it.
    fn check_elements(&self, elements: usize) -> Result<()> {
        let remaining = self.remaining();
        if elements > remaining {
            return Err(MetadataError::Truncated {
                offset: self.pos,
                needed: elements,
                remaining,
            });
        }
        Ok(())
    }

    /// Skips the next value, including everything nested inside it.
    pub fn skip_value(&mut self) -> Result<()> {
        let mut pending: usize = 1;
        while pending > 0 {
            pending -= 1;
            let marker_pos = self.pos;
            let marker = self.read_u8()?;
            let nested = match marker {
                0x00..=0x7f | 0xe0..=0xff | MARKER_NIL | MARKER_FALSE | MARKER_TRUE => 0,
                MARKER_UINT8 | MARKER_INT8 => {
                    self.take(1)?;
                    0
                }
                MARKER_UINT16 | MARKER_INT16 => {
                    self.take(2)?;
                    0
                }
                MARKER_UINT32 | MARKER_INT32 | MARKER_FLOAT32 => {
                    self.take(4)?;
                    0
                }
                MARKER_UINT64 | MARKER_INT64 | MARKER_FLOAT64 => {
                    self.take(8)?;
                    0
                }
                0xa0..=0xbf => {
                    self.take(usize::from(marker & 0x1f))?;
                    0
                }
                MARKER_STR8 | MARKER_BIN8 => {
                    let len = usize::from(self.read_u8()?);
                    self.take(len)?;
                    0
                }
                MARKER_STR16 | MARKER_BIN16 => {
                    let len = usize::from(self.read_be16()?);
                    self.take(len)?;
                    0
                }
                MARKER_STR32 | MARKER_BIN32 => {
                    let len = self.read_be32()? as usize;
                    self.take(len)?;
                    0
                }
                MARKER_FIXEXT1 => {
                    self.take(2)?;
                    0
                }
                MARKER_FIXEXT2 => {
                    self.take(3)?;
                    0
                }
                MARKER_FIXEXT4 => {
                    self.take(5)?;
                    0
                }
                MARKER_FIXEXT8 => {
                    self.take(9)?;
                    0
                }
                MARKER_FIXEXT16 => {
                    self.take(17)?;
                    0
                }
                MARKER_EXT8 => {
                    let len = usize::from(self.read_u8()?);
                    self.take(1 + len)?;
                    0
                }
                MARKER_EXT16 => {
                    let len = usize::from(self.read_be16()?);
                    self.take(1 + len)?;
                    0
                }
                MARKER_EXT32 => {
                    let len = self.read_be32()? as usize;
                    self.take(len.saturating_add(1))?;
                    0
                }
                0x90..=0x9f => usize::from(marker & 0x0f),
                MARKER_ARRAY16 => usize::from(self.read_be16()?),
                MARKER_ARRAY32 => self.read_be32()? as usize,
                0x80..=0x8f => usize::from(marker & 0x0f) * 2,
                MARKER_MAP16 => usize::from(self.read_be16()?) * 2,
                MARKER_MAP32 => (self.read_be32()? as usize).saturating_mul(2),
                MARKER_NEVER_USED => {
                    return Err(MetadataError::malformed(
                        marker_pos,
                        format!("reserved marker 0x{marker:02x}"),
                    ));
                }
            };
            pending = pending.saturating_add(nested);
            self.check_elements(pending)?;
        }
        Ok(())
    }

    /// Skips the next value and returns its complete encoded bytes.
    pub fn raw_value(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        self.skip_value()?;
        Ok(&self.bytes[start..self.pos])
    }
}

/// Appending MessagePack writer using the narrowest encoding for every header.
#[derive(Debug, Default, Clone)]
pub struct MsgPackWriter {
    buf: Vec<u8>,
}

impl MsgPackWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_nil(&mut self) {
        self.buf.push(MARKER_NIL);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(if v { MARKER_TRUE } else { MARKER_FALSE });
    }

    pub fn write_uint(&mut self, v: u64) {
        if v <= 0x7f {
            self.buf.push(v as u8);
        } else if v <= u64::from(u8::MAX) {
            self.buf.push(MARKER_UINT8);
            self.buf.push(v as u8);
        } else if v <= u64::from(u16::MAX) {
            self.buf.push(MARKER_UINT16);
            self.buf.extend_from_slice(&(v as u16).to_be_bytes());
        } else if v <= u64::from(u32::MAX) {
            self.buf.push(MARKER_UINT32);
            self.buf.extend_from_slice(&(v as u32).to_be_bytes());
        } else {
            self.buf.push(MARKER_UINT64);
            self.buf.extend_from_slice(&v.to_be_bytes());
        }
    }

    pub fn write_int(&mut self, v: i64) {
        if v >= 0 {
            self.write_uint(v as u64);
        } else if v >= -32 {
            self.buf.push(v as i8 as u8);
        } else if v >= i64::from(i8::MIN) {
            self.buf.push(MARKER_INT8);
            self.buf.push(v as i8 as u8);
        } else if v >= i64::from(i16::MIN) {
            self.buf.push(MARKER_INT16);
            self.buf.extend_from_slice(&(v as i16).to_be_bytes());
        } else if v >= i64::from(i32::MIN) {
            self.buf.push(MARKER_INT32);
            self.buf.extend_from_slice(&(v as i32).to_be_bytes());
        } else {
            self.buf.push(MARKER_INT64);
            self.buf.extend_from_slice(&v.to_be_bytes());
        }
    }

    pub fn write_str(&mut self, s: &str) {
        let len = s.len();
        if len <= 31 {
            self.buf.push(0xa0 | len as u8);
        } else if len <= usize::from(u8::MAX) {
            self.buf.push(MARKER_STR8);
            self.buf.push(len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.buf.push(MARKER_STR16);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            self.buf.push(MARKER_STR32);
            self.buf.extend_from_slice(&len_u32(len).to_be_bytes());
        }
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_bin(&mut self, data: &[u8]) {
        let len = data.len();
        if len <= usize::from(u8::MAX) {
            self.buf.push(MARKER_BIN8);
            self.buf.push(len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.buf.push(MARKER_BIN16);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            self.buf.push(MARKER_BIN32);
            self.buf.extend_from_slice(&len_u32(len).to_be_bytes());
        }
        self.buf.extend_from_slice(data);
    }

    pub fn write_array_len(&mut self, len: u32) {
        if len <= 15 {
            self.buf.push(0x90 | len as u8);
        } else if len <= u32::from(u16::MAX) {
            self.buf.push(MARKER_ARRAY16);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            self.buf.push(MARKER_ARRAY32);
            self.buf.extend_from_slice(&len.to_be_bytes());
        }
    }

    pub fn write_map_len(&mut self, len: u32) {
        if len <= 15 {
            self.buf.push(0x80 | len as u8);
        } else if len <= u32::from(u16::MAX) {
            self.buf.push(MARKER_MAP16);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            self.buf.push(MARKER_MAP32);
            self.buf.extend_from_slice(&len.to_be_bytes());
        }
    }

    /// Appends pre-encoded MessagePack bytes verbatim.
    pub fn write_raw(&mut self, encoded: &[u8]) {
        self.buf.extend_from_slice(encoded);
    }
}

fn len_u32(len: usize) -> u32 {
    assert!(len <= u32::MAX as usize, "MessagePack value too large for u32 length");
    len as u32
}
