//! Startup snapshot reader.
//!
//! Reads the minimal subset of the RDB format the string store needs:
//! string values with optional expiry, plus the framing opcodes around
//! them (auxiliary fields, database selector, hash-table size hints).
//! Anything else in the file is a hard error — better to refuse startup
//! than to load half a keyspace.

use std::path::Path;

use thiserror::Error;

/// One key loaded from a snapshot file.  `expires_at_ms` is an absolute
/// Unix-epoch millisecond deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub expires_at_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot file: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot file is truncated")]
    Truncated,
    #[error("snapshot file has a bad magic header")]
    BadMagic,
    #[error("unsupported snapshot opcode {0:#04x}")]
    UnsupportedOpcode(u8),
    #[error("unsupported value type {0:#04x}")]
    UnsupportedValue(u8),
    #[error("unsupported string encoding {0:#04x}")]
    UnsupportedEncoding(u8),
}

pub fn read_file(path: &Path) -> Result<Vec<SnapshotEntry>, SnapshotError> {
    let bytes = std::fs::read(path)?;
    parse(&bytes)
}

/// String value, type byte 0.
const TYPE_STRING: u8 = 0x00;
const OP_AUX: u8 = 0xFA;
const OP_RESIZEDB: u8 = 0xFB;
const OP_EXPIRE_MS: u8 = 0xFC;
const OP_EXPIRE_S: u8 = 0xFD;
const OP_SELECTDB: u8 = 0xFE;
const OP_EOF: u8 = 0xFF;

pub fn parse(bytes: &[u8]) -> Result<Vec<SnapshotEntry>, SnapshotError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let magic = cursor.take(9)?;
    if !magic.starts_with(b"REDIS") {
        return Err(SnapshotError::BadMagic);
    }

    let mut entries = Vec::new();
    loop {
        match cursor.u8()? {
            OP_EOF => break,
            OP_AUX => {
                cursor.string()?;
                cursor.string()?;
            }
            OP_SELECTDB => {
                cursor.length()?;
            }
            OP_RESIZEDB => {
                cursor.length()?;
                cursor.length()?;
            }
            OP_EXPIRE_MS => {
                let deadline = cursor.u64_le()?;
                entries.push(cursor.string_entry(Some(deadline))?);
            }
            OP_EXPIRE_S => {
                let deadline = u64::from(cursor.u32_le()?) * 1000;
                entries.push(cursor.string_entry(Some(deadline))?);
            }
            TYPE_STRING => {
                let key = cursor.string()?;
                let value = cursor.string()?;
                entries.push(SnapshotEntry {
                    key,
                    value,
                    expires_at_ms: None,
                });
            }
            other => return Err(SnapshotError::UnsupportedOpcode(other)),
        }
    }
    // Trailing checksum (if any) is not verified.
    Ok(entries)
}

enum Length {
    Plain(usize),
    /// Top bits `11`: the low bits select an integer-as-string encoding.
    Special(u8),
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        let rest = &self.bytes[self.pos..];
        if rest.len() < n {
            return Err(SnapshotError::Truncated);
        }
        self.pos += n;
        Ok(&rest[..n])
    }

    fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    fn u32_le(&mut self) -> Result<u32, SnapshotError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64_le(&mut self) -> Result<u64, SnapshotError> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn length(&mut self) -> Result<Length, SnapshotError> {
        let first = self.u8()?;
        match first >> 6 {
            0b00 => Ok(Length::Plain(usize::from(first & 0x3F))),
            0b01 => {
                let second = self.u8()?;
                Ok(Length::Plain(
                    (usize::from(first & 0x3F) << 8) | usize::from(second),
                ))
            }
            0b10 => {
                let raw = self.take(4)?;
                Ok(Length::Plain(
                    u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                ))
            }
            _ => Ok(Length::Special(first & 0x3F)),
        }
    }

    fn string(&mut self) -> Result<Vec<u8>, SnapshotError> {
        match self.length()? {
            Length::Plain(n) => Ok(self.take(n)?.to_vec()),
            Length::Special(0) => {
                #[allow(clippy::cast_possible_wrap)]
                let v = self.u8()? as i8;
                Ok(v.to_string().into_bytes())
            }
            Length::Special(1) => {
                let raw = self.take(2)?;
                let v = i16::from_le_bytes([raw[0], raw[1]]);
                Ok(v.to_string().into_bytes())
            }
            Length::Special(2) => {
                #[allow(clippy::cast_possible_wrap)]
                let v = self.u32_le()? as i32;
                Ok(v.to_string().into_bytes())
            }
            Length::Special(enc) => Err(SnapshotError::UnsupportedEncoding(enc)),
        }
    }

    fn string_entry(&mut self, expires_at_ms: Option<u64>) -> Result<SnapshotEntry, SnapshotError> {
        let value_type = self.u8()?;
        if value_type != TYPE_STRING {
            return Err(SnapshotError::UnsupportedValue(value_type));
        }
        let key = self.string()?;
        let value = self.string()?;
        Ok(SnapshotEntry {
            key,
            value,
            expires_at_ms,
        })
    }
}
