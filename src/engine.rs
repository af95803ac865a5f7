//! The storage engine façade (spec.md §4.5) — C5 Engine.
//!
//! Ties C1–C4 together: segment rotation, the single active file, the
//! index, and the replay-based recovery that makes the whole thing crash
//! tolerant. Concurrency follows spec.md §5's permitted relaxation — see
//! the lock discussion on [`Engine`] below.

use std::collections::HashMap;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::data_file::{data_file_name, DataFile, DATA_FILE_SUFFIX};
use crate::error::EngineError;
use crate::index::{BTreeIndex, Index};
use crate::options::{IndexType, Options};
use crate::record::{self, Record, RecordPosition};

/// Directory mode for a freshly created data directory (spec.md §6).
const DATA_DIR_MODE: u32 = 0o755;

/// Mutable rotation state: the currently active (writable) segment and the
/// closed, read-only older segments. Everything here is guarded by
/// [`Engine::state`].
struct State {
    active_file: DataFile,
    older_files: HashMap<u32, DataFile>,
}

/// An open key/value store rooted at one data directory.
///
/// `state` is a single `parking_lot::RwLock`. `put`/`delete` (and the
/// rotation they may trigger) take the write guard for the whole operation;
/// `get` takes only the read guard, relying on the facts that (a) a segment
/// never changes once it stops being the active file, and (b) positional
/// reads never race with the active file's append-only writer. This is the
/// relaxation spec.md §5 explicitly permits, not an oversight.
pub struct Engine {
    options: Options,
    state: RwLock<State>,
    index: Box<dyn Index>,
}

impl Engine {
    /// Open (and if necessary create) the store at `options.dir_path`,
    /// replaying every existing segment to rebuild the index (spec.md
    /// §4.5.1, §4.5.6).
    pub fn open(options: Options) -> Result<Self, EngineError> {
        options.validate()?;

        if matches!(options.index_type, IndexType::Art) {
            return Err(EngineError::BadOptions(
                "ART index backend is not implemented; use IndexType::BTree",
            ));
        }

        if !options.dir_path.exists() {
            DirBuilder::new()
                .recursive(true)
                .mode(DATA_DIR_MODE)
                .create(&options.dir_path)?;
        }

        let file_ids = discover_segment_ids(&options.dir_path)?;
        let index: Box<dyn Index> = Box::new(BTreeIndex::new());

        let (active_file, older_files) = load_segments(&options.dir_path, &file_ids)?;

        let mut engine = Self {
            options,
            state: RwLock::new(State {
                active_file,
                older_files,
            }),
            index,
        };
        engine.replay(&file_ids)?;
        Ok(engine)
    }

    /// Insert or overwrite `key` with `value`. Empty keys are rejected
    /// (spec.md §4.5.2, I2).
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        if key.is_empty() {
            return Err(EngineError::KeyIsEmpty);
        }
        let record = Record::normal(key.to_vec(), value.to_vec());
        let position = self.append_log_record(&record)?;
        self.index.put(key.to_vec(), position);
        Ok(())
    }

    /// Look up the current value for `key`. Uses only the read guard.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, EngineError> {
        if key.is_empty() {
            return Err(EngineError::KeyIsEmpty);
        }
        let position = self.index.get(key).ok_or(EngineError::KeyNotFound)?;
        let state = self.state.read();
        let record = self.read_at(&state, position)?;
        if record.is_tombstone() {
            return Err(EngineError::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Remove `key`, appending a tombstone record (spec.md §4.5.4). This
    /// unconditionally appends the tombstone and removes the key from the
    /// index, even if the key is not currently present — the same as
    /// `Put`, `Delete` has no existence precondition in spec.md §4.5.4.
    pub fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        if key.is_empty() {
            return Err(EngineError::KeyIsEmpty);
        }
        let record = Record::tombstone(key.to_vec());
        self.append_log_record(&record)?;
        self.index.delete(key);
        Ok(())
    }

    /// Flush and release the active segment (spec.md §4.5.7). The engine is
    /// unusable after this returns; dropping it without calling `close` is
    /// also safe, since every write that mattered was already synced or
    /// durably appended.
    pub fn close(&self) -> Result<(), EngineError> {
        let state = self.state.read();
        state.active_file.sync()?;
        Ok(())
    }

    /// Diagnostic snapshot used by the `caskctl stat` subcommand.
    pub fn stat(&self) -> EngineStat {
        let state = self.state.read();
        EngineStat {
            active_file_id: state.active_file.file_id,
            segment_count: state.older_files.len() + 1,
            key_count: self.index.len(),
            sync_writes: self.options.sync_writes,
            index_type: self.options.index_type,
        }
    }

    /// Append one record to the active segment, rotating first if it would
    /// overflow `data_file_size` (spec.md §4.5.5). Returns the position the
    /// record was written at.
    fn append_log_record(&self, record: &Record) -> Result<RecordPosition, EngineError> {
        let (buf, len) = record::encode(record);
        let mut state = self.state.write();

        if state.active_file.write_offset + len > self.options.data_file_size {
            self.rotate(&mut state)?;
        }

        let file_id = state.active_file.file_id;
        let offset = state.active_file.write_offset as i64;
        state.active_file.write(&buf)?;

        if self.options.sync_writes {
            state.active_file.sync()?;
        }

        Ok(RecordPosition { file_id, offset })
    }

    /// Retire the current active segment into `older_files` and open a fresh
    /// one with the next file id. Caller must already hold the write guard.
    fn rotate(&self, state: &mut State) -> Result<(), EngineError> {
        state.active_file.sync()?;
        let old_id = state.active_file.file_id;
        let new_id = old_id + 1;
        debug!(old_id, new_id, "rotating active segment");

        let new_active = DataFile::open(&self.options.dir_path, new_id)?;
        let old_active = std::mem::replace(&mut state.active_file, new_active);
        state.older_files.insert(old_id, old_active);
        Ok(())
    }

    /// Read and decode the record at `position`, regardless of whether it
    /// lives in the active file or an older one.
    fn read_at(&self, state: &State, position: RecordPosition) -> Result<Record, EngineError> {
        let offset = position.offset as u64;
        let (record, _) = if position.file_id == state.active_file.file_id {
            state.active_file.read_log_record(offset)?
        } else {
            let df = state
                .older_files
                .get(&position.file_id)
                .ok_or(EngineError::DataFileNotFound(position.file_id))?;
            df.read_log_record(offset)?
        }
        .ok_or_else(|| EngineError::CorruptRecord("index points past end of segment"))?;
        Ok(record)
    }

    /// Rebuild the index by replaying every segment in ascending file id
    /// order (spec.md §4.5.6). A checksum or framing failure partway through
    /// a segment is fatal (the directory is treated as corrupted); a
    /// truncated tail on the *last* segment (the one a crash would have
    /// interrupted) is tolerated and simply stops replay at that point.
    fn replay(&mut self, file_ids: &[u32]) -> Result<(), EngineError> {
        if file_ids.is_empty() {
            return Ok(());
        }
        let last_id = *file_ids.last().unwrap();
        let mut active_final_offset = 0u64;

        {
            let state = self.state.read();

            for &file_id in file_ids {
                let mut offset = 0u64;
                loop {
                    let df: &DataFile = if file_id == state.active_file.file_id {
                        &state.active_file
                    } else {
                        state
                            .older_files
                            .get(&file_id)
                            .ok_or(EngineError::DataFileNotFound(file_id))?
                    };

                    match df.read_log_record(offset) {
                        Ok(Some((record, consumed))) => {
                            let position = RecordPosition {
                                file_id,
                                offset: offset as i64,
                            };
                            if record.is_tombstone() {
                                self.index.delete(&record.key);
                            } else {
                                self.index.put(record.key.clone(), position);
                            }
                            offset += consumed;
                        }
                        Ok(None) => break,
                        Err(err) => {
                            if file_id == last_id {
                                warn!(file_id, offset, %err, "stopping replay at corrupt/truncated tail of active segment");
                                break;
                            }
                            error!(file_id, offset, %err, "corrupt record in a closed segment");
                            return Err(EngineError::DataDirectoryCorrupted(format!(
                                "segment {file_id} corrupt at offset {offset}: {err}"
                            )));
                        }
                    }
                }
                if file_id == last_id {
                    active_final_offset = offset;
                }
            }
        } // read guard dropped before truncation needs the write guard

        // Invariant I3: the active file's write_offset must reflect the
        // final valid offset replay reached, and any crash-truncated garbage
        // past that point must be discarded — otherwise a later append
        // lands (via O_APPEND) after the garbage, and a subsequent replay
        // can never skip past it to find those records again.
        {
            let mut state = self.state.write();
            if active_final_offset != state.active_file.write_offset {
                warn!(
                    file_id = last_id,
                    kept = active_final_offset,
                    discarded = state.active_file.write_offset,
                    "truncating crash-tail garbage from active segment"
                );
            }
            state.active_file.truncate(active_final_offset)?;
        }

        debug!(segments = file_ids.len(), keys = self.index.len(), "replay complete");
        Ok(())
    }
}

/// Diagnostic snapshot of engine state (`caskctl stat`).
#[derive(Debug, Clone)]
pub struct EngineStat {
    pub active_file_id: u32,
    pub segment_count: usize,
    pub key_count: usize,
    pub sync_writes: bool,
    pub index_type: IndexType,
}

/// Enumerate `<id>.data` files under `dir`, sorted ascending. An unparseable
/// segment filename is a corrupt data directory (spec.md §7).
fn discover_segment_ids(dir: &Path) -> Result<Vec<u32>, EngineError> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(DATA_FILE_SUFFIX) {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| EngineError::DataDirectoryCorrupted(format!("unreadable segment filename: {path:?}")))?;
        let id: u32 = stem
            .parse()
            .map_err(|_| EngineError::DataDirectoryCorrupted(format!("non-numeric segment id: {stem}")))?;
        ids.push(id);
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Open every discovered segment, splitting the highest id off as the
/// active file. A fresh directory gets a single empty segment `0.data`.
fn load_segments(dir: &Path, file_ids: &[u32]) -> Result<(DataFile, HashMap<u32, DataFile>), EngineError> {
    if file_ids.is_empty() {
        return Ok((DataFile::open(dir, 0)?, HashMap::new()));
    }

    let mut older = HashMap::new();
    for &id in &file_ids[..file_ids.len() - 1] {
        older.insert(id, DataFile::open(dir, id)?);
    }
    let active_id = *file_ids.last().unwrap();
    let active = DataFile::open(dir, active_id)?;
    Ok((active, older))
}

/// Path of the segment for `file_id` under `dir`. Exposed for tests and the
/// CLI's `stat` subcommand.
pub fn segment_path(dir: &Path, file_id: u32) -> std::path::PathBuf {
    data_file_name(dir, file_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn opts(dir: &Path) -> Options {
        Options {
            dir_path: dir.to_path_buf(),
            data_file_size: 1024 * 1024,
            sync_writes: false,
            index_type: IndexType::BTree,
        }
    }

    #[test]
    fn put_get_delete_round_trip() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(opts(dir.path())).unwrap();
        engine.put(b"k1", b"v1").unwrap();
        assert_eq!(engine.get(b"k1").unwrap(), b"v1");

        engine.delete(b"k1").unwrap();
        assert!(matches!(engine.get(b"k1"), Err(EngineError::KeyNotFound)));
    }

    #[test]
    fn empty_key_is_rejected_everywhere() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(opts(dir.path())).unwrap();
        assert!(matches!(engine.put(b"", b"v"), Err(EngineError::KeyIsEmpty)));
        assert!(matches!(engine.get(b""), Err(EngineError::KeyIsEmpty)));
        assert!(matches!(engine.delete(b""), Err(EngineError::KeyIsEmpty)));
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(opts(dir.path())).unwrap();
        assert!(matches!(engine.get(b"missing"), Err(EngineError::KeyNotFound)));
    }

    #[test]
    fn delete_of_absent_key_succeeds_and_stays_absent() {
        // Delete has no existence precondition (spec.md §4.5.4): it
        // unconditionally appends a tombstone, the same as Put appends a
        // normal record regardless of whether the key previously existed.
        let dir = tempdir().unwrap();
        let engine = Engine::open(opts(dir.path())).unwrap();
        assert!(engine.delete(b"missing").is_ok());
        assert!(matches!(engine.get(b"missing"), Err(EngineError::KeyNotFound)));
    }

    #[test]
    fn overwrite_replaces_value() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(opts(dir.path())).unwrap();
        engine.put(b"k", b"v1").unwrap();
        engine.put(b"k", b"v2").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), b"v2");
    }

    #[test]
    fn rotates_segments_past_the_size_threshold() {
        let dir = tempdir().unwrap();
        let mut options = opts(dir.path());
        options.data_file_size = 64; // force rotation almost immediately
        let engine = Engine::open(options).unwrap();

        for i in 0..20u32 {
            let key = format!("key-{i}");
            engine.put(key.as_bytes(), b"some value bytes").unwrap();
        }

        let stat = engine.stat();
        assert!(stat.segment_count > 1, "expected rotation to have occurred");
        for i in 0..20u32 {
            let key = format!("key-{i}");
            assert_eq!(engine.get(key.as_bytes()).unwrap(), b"some value bytes");
        }
    }

    #[test]
    fn reopening_replays_the_log_in_order() {
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open(opts(dir.path())).unwrap();
            engine.put(b"a", b"1").unwrap();
            engine.put(b"b", b"2").unwrap();
            engine.put(b"a", b"3").unwrap();
            engine.delete(b"b").unwrap();
            engine.close().unwrap();
        }

        let engine = Engine::open(opts(dir.path())).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"3");
        assert!(matches!(engine.get(b"b"), Err(EngineError::KeyNotFound)));
    }

    #[test]
    fn art_index_type_is_rejected_at_open() {
        let dir = tempdir().unwrap();
        let mut options = opts(dir.path());
        options.index_type = IndexType::Art;
        assert!(matches!(Engine::open(options), Err(EngineError::BadOptions(_))));
    }

    #[test]
    fn corrupt_closed_segment_fails_open() {
        let dir = tempdir().unwrap();
        {
            let mut options = opts(dir.path());
            options.data_file_size = 32; // force at least one rotation
            let engine = Engine::open(options).unwrap();
            for i in 0..10u32 {
                engine.put(format!("k{i}").as_bytes(), b"payload-bytes").unwrap();
            }
        }

        // Corrupt the oldest (closed) segment, not the active one.
        let closed_segment = segment_path(dir.path(), 0);
        let mut bytes = fs::read(&closed_segment).unwrap();
        if bytes.len() > 10 {
            bytes[8] ^= 0xFF;
        }
        fs::write(&closed_segment, bytes).unwrap();

        let result = Engine::open(opts(dir.path()));
        assert!(matches!(result, Err(EngineError::DataDirectoryCorrupted(_))));
    }

    #[test]
    fn truncated_tail_of_active_segment_is_tolerated() {
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open(opts(dir.path())).unwrap();
            engine.put(b"whole", b"record").unwrap();
        }

        let active_segment = segment_path(dir.path(), 0);
        let bytes_before_garbage = fs::read(&active_segment).unwrap().len();
        let mut bytes = fs::read(&active_segment).unwrap();
        bytes.extend_from_slice(&[9, 9, 9]); // partial garbage frame header
        fs::write(&active_segment, bytes).unwrap();

        let engine = Engine::open(opts(dir.path())).unwrap();
        assert_eq!(engine.get(b"whole").unwrap(), b"record");

        // The garbage tail must be physically discarded, not just skipped
        // in the index: the segment's on-disk length should shrink back to
        // exactly the valid prefix.
        let len_after_recovery = fs::metadata(&active_segment).unwrap().len();
        assert_eq!(len_after_recovery, bytes_before_garbage as u64);
    }

    #[test]
    fn write_after_tolerated_recovery_survives_a_second_reopen() {
        // Regression test: if the crash-truncated garbage tail is not
        // discarded and write_offset is not reset, a write issued after the
        // tolerant reopen lands (via O_APPEND) past the garbage. A later
        // replay scans linearly from offset 0, stops at the garbage, and
        // never sees that write again — silent data loss across a second
        // restart.
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open(opts(dir.path())).unwrap();
            engine.put(b"a", b"1").unwrap();
            engine.put(b"b", b"2").unwrap();
        }

        let active_segment = segment_path(dir.path(), 0);
        let mut bytes = fs::read(&active_segment).unwrap();
        bytes.extend_from_slice(&[9, 9, 9, 9, 9]); // crash-truncated garbage frame
        fs::write(&active_segment, bytes).unwrap();

        {
            let engine = Engine::open(opts(dir.path())).unwrap();
            assert_eq!(engine.get(b"a").unwrap(), b"1");
            assert_eq!(engine.get(b"b").unwrap(), b"2");
            engine.put(b"c", b"3").unwrap();
            engine.close().unwrap();
        }

        let engine = Engine::open(opts(dir.path())).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"1");
        assert_eq!(engine.get(b"b").unwrap(), b"2");
        assert_eq!(engine.get(b"c").unwrap(), b"3");
    }

    #[test]
    fn corrupt_type_tag_in_middle_of_closed_segment_is_fatal() {
        // A header that parses completely but has an invalid type tag must
        // be treated as corruption, not as "ran out of bytes" — even when
        // it happens to sit in a closed (non-active) segment.
        let dir = tempdir().unwrap();
        let mut options = opts(dir.path());
        // Large enough to hold exactly one "k0"/"v0" record (11 bytes) but
        // not two, so the rotation happens after the first write and
        // segment 0 ends up closed with that one record intact.
        options.data_file_size = 15;
        {
            let engine = Engine::open(options.clone()).unwrap();
            engine.put(b"k0", b"v0").unwrap();
            engine.put(b"k1", b"v1").unwrap();
        }

        let closed_segment = segment_path(dir.path(), 0);
        let mut bytes = fs::read(&closed_segment).unwrap();
        // Byte index 4 is the record type tag (after the 4-byte checksum);
        // any value other than 0 or 1 is structurally invalid.
        bytes[4] = 0xFF;
        fs::write(&closed_segment, bytes).unwrap();

        let result = Engine::open(options);
        assert!(matches!(result, Err(EngineError::DataDirectoryCorrupted(_))));
    }

    #[test]
    fn concurrent_writers_and_readers_do_not_corrupt_state() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir().unwrap();
        let engine = Arc::new(Engine::open(opts(dir.path())).unwrap());

        let mut handles = Vec::new();
        for w in 0..4 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("w{w}-k{i}");
                    engine.put(key.as_bytes(), b"value").unwrap();
                }
            }));
        }
        for r in 0..4 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let _ = engine.get(format!("w{r}-k0").as_bytes());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(engine.stat().key_count, 200);
    }
}
