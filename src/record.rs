//! The on-disk record frame (spec.md §3, §4.2) — C2 Record Codec.
//!
//! ```text
//! [checksum: u32 LE][type: u8][key_len: varint][value_len: varint][key][value]
//! ```
//! The checksum covers every byte after itself. Decoding never trusts the
//! length fields before checking the checksum on the bytes they claim to
//! delimit.

use byteorder::{ByteOrder, LittleEndian};
use integer_encoding::VarInt;

use crate::error::EngineError;

/// Tag byte distinguishing a live value from a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Normal = 0,
    Deleted = 1,
}

impl RecordType {
    fn from_byte(b: u8) -> Result<Self, EngineError> {
        match b {
            0 => Ok(RecordType::Normal),
            1 => Ok(RecordType::Deleted),
            _ => Err(EngineError::CorruptRecord("unknown record type tag")),
        }
    }
}

/// One logical key/value entry as it travels between the engine and the
/// segment log. `key`/`value` are opaque bytes; this module assigns no
/// meaning to their contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub record_type: RecordType,
}

impl Record {
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            record_type: RecordType::Normal,
        }
    }

    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            record_type: RecordType::Deleted,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.record_type == RecordType::Deleted
    }
}

/// Position of one record within the segment log (spec.md §3 `RecordPosition`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    pub file_id: u32,
    pub offset: i64,
}

/// Encode `record` into its on-disk frame. Returns the frame bytes and their
/// length (callers append the former and advance the write offset by the
/// latter).
pub fn encode(record: &Record) -> (Vec<u8>, u64) {
    let type_byte = record.record_type as u8;
    let key_len_buf = record.key.len().encode_var_vec();
    let value_len_buf = record.value.len().encode_var_vec();

    let header_len = 4 + 1 + key_len_buf.len() + value_len_buf.len();
    let total_len = header_len + record.key.len() + record.value.len();

    let mut buf = Vec::with_capacity(total_len);
    buf.extend_from_slice(&[0u8; 4]); // checksum placeholder, patched below
    buf.push(type_byte);
    buf.extend_from_slice(&key_len_buf);
    buf.extend_from_slice(&value_len_buf);
    buf.extend_from_slice(&record.key);
    buf.extend_from_slice(&record.value);

    let checksum = crc32fast::hash(&buf[4..]);
    LittleEndian::write_u32(&mut buf[0..4], checksum);

    let len = buf.len() as u64;
    (buf, len)
}

/// Fixed part of the header that must be present before the varint lengths
/// can even be parsed: 4 bytes checksum + 1 byte type. The varint lengths
/// that follow are variable width, so callers read this much, decode the two
/// varints, then read exactly `key_len + value_len` more bytes.
pub const MAX_HEADER_LEN: usize = 4 + 1 + 10 + 10; // two LEB128 u64s, worst case

/// Decoded header: record type and key/value lengths, plus the number of
/// header bytes actually consumed (checksum is validated by [`decode`], not
/// here, since the checksum covers the key/value bytes too).
pub(crate) struct Header {
    pub checksum: u32,
    pub record_type: RecordType,
    pub key_len: usize,
    pub value_len: usize,
    pub header_len: usize,
}

/// Parse the fixed+varint header out of `buf`, which must contain at least
/// [`MAX_HEADER_LEN`] bytes or the whole remaining tail of the segment
/// (whichever is shorter — callers at EOF pass a short, possibly truncated
/// buffer and rely on this returning `None`).
pub(crate) fn decode_header(buf: &[u8]) -> Result<Option<Header>, EngineError> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let checksum = LittleEndian::read_u32(&buf[0..4]);
    let record_type = RecordType::from_byte(buf[4])?;

    let rest = &buf[5..];
    let (key_len, key_len_width) = match u64::decode_var(rest) {
        Some(v) => v,
        None => return Ok(None),
    };
    let rest = &rest[key_len_width..];
    let (value_len, value_len_width) = match u64::decode_var(rest) {
        Some(v) => v,
        None => return Ok(None),
    };

    let header_len = 5 + key_len_width + value_len_width;
    Ok(Some(Header {
        checksum,
        record_type,
        key_len: key_len as usize,
        value_len: value_len as usize,
        header_len,
    }))
}

/// Decode one full record frame out of `buf`. `buf` must contain at least
/// the header plus `key_len + value_len` bytes; returns
/// [`EngineError::CorruptRecord`] if the checksum does not match, which
/// covers both bit-flip corruption and a frame truncated mid-payload.
pub fn decode(buf: &[u8]) -> Result<(Record, u64), EngineError> {
    let header = decode_header(buf)?
        .ok_or(EngineError::CorruptRecord("frame too short to contain a header"))?;

    let total_len = header.header_len + header.key_len + header.value_len;
    if buf.len() < total_len {
        return Err(EngineError::CorruptRecord("frame truncated before end of payload"));
    }

    let body = &buf[4..total_len];
    let computed = crc32fast::hash(body);
    if computed != header.checksum {
        return Err(EngineError::CorruptRecord("checksum mismatch"));
    }

    let key_start = header.header_len;
    let value_start = key_start + header.key_len;
    let key = buf[key_start..value_start].to_vec();
    let value = buf[value_start..total_len].to_vec();

    Ok((
        Record {
            key,
            value,
            record_type: header.record_type,
        },
        total_len as u64,
    ))
}
