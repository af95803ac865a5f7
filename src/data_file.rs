//! One segment of the append-only log (spec.md §4.3) — C3 Data File.
//!
//! A `DataFile` owns exactly one on-disk segment (`<file_id>.data`) plus the
//! write offset the engine is currently appending at. Everything about frame
//! layout lives in [`crate::record`]; this module only knows how to find
//! frame boundaries inside a byte stream.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::EngineError;
use crate::io::{FileIo, IoManager};
use crate::record::{self, Record, MAX_HEADER_LEN};

/// Segment file extension (spec.md §6: `<file_id>.data`).
pub const DATA_FILE_SUFFIX: &str = "data";

pub fn data_file_name(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{}.{}", file_id, DATA_FILE_SUFFIX))
}

pub struct DataFile {
    pub file_id: u32,
    pub write_offset: u64,
    io: Box<dyn IoManager>,
}

impl DataFile {
    /// Open (creating if absent) the segment for `file_id` under `dir`.
    pub fn open(dir: &Path, file_id: u32) -> Result<Self, EngineError> {
        let path = data_file_name(dir, file_id);
        let io = FileIo::open(&path)?;
        let write_offset = io.size()?;
        Ok(Self {
            file_id,
            write_offset,
            io: Box::new(io),
        })
    }

    /// Append one pre-encoded frame, advancing `write_offset` by its length.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), EngineError> {
        self.io.write(buf)?;
        self.write_offset += buf.len() as u64;
        Ok(())
    }

    /// Discard any bytes past `len` and set `write_offset` to match
    /// (spec.md §4.5.6, invariant I3). Used after replay tolerates a
    /// crash-truncated tail record, so that subsequent appends land right
    /// after the last valid frame instead of after the garbage bytes — an
    /// `O_APPEND` writer otherwise has no way to skip over them.
    pub fn truncate(&mut self, len: u64) -> Result<(), EngineError> {
        self.io.set_len(len)?;
        self.write_offset = len;
        Ok(())
    }

    pub fn sync(&self) -> Result<(), EngineError> {
        self.io.sync().map_err(EngineError::from)
    }

    /// Read and decode exactly one record frame starting at `offset`.
    ///
    /// Returns `Ok(None)` when `offset` is at or past the current end of
    /// file — the normal way [`crate::engine::Engine`]'s replay loop
    /// recognizes it has reached the end of a segment. A frame that starts
    /// but cannot be completed (a crash mid-append left a truncated tail)
    /// also surfaces as `Ok(None)`, per spec.md §4.5.6's crash-tolerance
    /// requirement; a frame that is fully present but checksum-fails is a
    /// real [`EngineError::CorruptRecord`].
    pub fn read_log_record(&self, offset: u64) -> Result<Option<(Record, u64)>, EngineError> {
        let file_len = self.io.size()?;
        if offset >= file_len {
            return Ok(None);
        }

        let header_probe_len = MAX_HEADER_LEN.min((file_len - offset) as usize);
        let mut header_buf = vec![0u8; header_probe_len];
        self.io.read(&mut header_buf, offset)?;

        let header = match record::decode_header(&header_buf) {
            Ok(Some(h)) => h,
            Ok(None) => {
                warn!(file_id = self.file_id, offset, "truncated record header at tail, treating as end of segment");
                return Ok(None);
            }
            // A header that *parses completely* but fails a structural check
            // (e.g. an unknown type tag) is not a short buffer — it is a
            // corrupt record, wherever in the segment it appears. Only
            // `decode_header`'s own `Ok(None)` means "not enough bytes yet".
            Err(err) => return Err(err),
        };

        let total_len = header.header_len as u64 + header.key_len as u64 + header.value_len as u64;
        if offset + total_len > file_len {
            warn!(file_id = self.file_id, offset, "record payload truncated at tail, treating as end of segment");
            return Ok(None);
        }

        let mut frame_buf = vec![0u8; total_len as usize];
        self.io.read(&mut frame_buf, offset)?;

        let (record, consumed) = record::decode(&frame_buf)?;
        Ok(Some((record, consumed)))
    }
}
